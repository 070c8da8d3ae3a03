//! Agent configuration

use anyhow::{Context, Result};
use converge_lib::models::{DesiredApplication, DEFAULT_NAMESPACE};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Agent configuration, read from `CONVERGE_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Namespace every managed resource lives in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Pause between reconcile sweeps in seconds
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// JSON file holding the desired applications
    #[serde(default = "default_apps_path")]
    pub apps_path: PathBuf,
}

fn default_api_port() -> u16 {
    8080
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_reconcile_interval() -> u64 {
    30
}

fn default_apps_path() -> PathBuf {
    PathBuf::from("/etc/converge/applications.json")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            namespace: default_namespace(),
            reconcile_interval_secs: default_reconcile_interval(),
            apps_path: default_apps_path(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Environment::with_prefix("CONVERGE").try_parsing(true));
        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        builder
            .build()?
            .try_deserialize()
            .context("invalid CONVERGE_* configuration")
    }
}

/// Read the desired applications, placing each one in `namespace`
pub fn load_applications(path: &Path, namespace: &str) -> Result<Vec<DesiredApplication>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read applications from {}", path.display()))?;
    let mut apps: Vec<DesiredApplication> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse applications in {}", path.display()))?;
    for app in &mut apps {
        app.namespace = namespace.to_string();
    }
    Ok(apps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let config = AgentConfig::from_builder(config::Config::builder()).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.namespace, "paasta");
        assert_eq!(config.reconcile_interval_secs, 30);
    }

    #[test]
    fn test_overrides_applied() {
        let builder = config::Config::builder()
            .set_override("api_port", 9100)
            .unwrap()
            .set_override("namespace", "staging")
            .unwrap();
        let config = AgentConfig::from_builder(builder).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.namespace, "staging");
    }

    #[test]
    fn test_load_applications() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{
                "service": "kurupt",
                "instance": "fm",
                "spec": {{"instances": 2, "bounce_method": "brutal"}},
                "workload": {{"spec": {{"replicas": 2, "selector": {{}}, "template": {{}}}}}}
            }}]"#
        )
        .unwrap();

        let apps = load_applications(file.path(), "staging").unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].key(), "kurupt.fm");
        assert_eq!(apps[0].namespace, "staging");
        assert_eq!(apps[0].spec.instances, Some(2));
    }

    #[test]
    fn test_load_applications_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_applications(&dir.path().join("absent.json"), "paasta").unwrap_err();
        assert!(err.to_string().contains("failed to read applications"));
    }
}
