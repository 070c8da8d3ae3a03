//! CLI integration tests

use std::process::{Command, Output};

fn run_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_converge"))
        .args(args)
        .env_remove("CONVERGE_API_URL")
        .output()
        .expect("Failed to execute command")
}

#[test]
fn test_cli_help() {
    let output = run_cli(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("mark-for-deployment"));
    assert!(stdout.contains("wait-for-deployment"));
    assert!(stdout.contains("status"));
}

#[test]
fn test_cli_version() {
    let output = run_cli(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("converge"), "Should show binary name");
}

#[test]
fn test_mark_for_deployment_help() {
    let output = run_cli(&["mark-for-deployment", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for flag in [
        "--git-url",
        "--commit",
        "--deploy-group",
        "--service",
        "--wait-for-deployment",
        "--timeout",
        "--soa-dir",
    ] {
        assert!(stdout.contains(flag), "Should show {} option", flag);
    }
    assert!(stdout.contains("1200"), "Should show the default timeout");
}

#[test]
fn test_mark_for_deployment_requires_arguments() {
    let output = run_cli(&["mark-for-deployment", "--commit", "abc123"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--git-url"));
}

#[test]
fn test_unknown_service_fails_before_pushing() {
    let soa_dir = tempfile::tempdir().unwrap();
    let output = run_cli(&[
        "mark-for-deployment",
        "-u",
        "git@git.example.com:services/kurupt",
        "-c",
        "abc123",
        "-l",
        "prod.main",
        "-s",
        "services-kurupt",
        "-d",
        soa_dir.path().to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Service kurupt not found"));
}

#[test]
fn test_wait_for_deployment_unreachable_api_exits_1() {
    let output = run_cli(&[
        "--api-url",
        "http://127.0.0.1:9",
        "wait-for-deployment",
        "-c",
        "abc123",
        "-l",
        "prod.main",
        "-s",
        "kurupt",
        "-t",
        "5",
    ]);

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_status_help() {
    let output = run_cli(&["status", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--deploy-group"));
    assert!(stdout.contains("--format"));
}
