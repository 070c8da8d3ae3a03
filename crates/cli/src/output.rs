//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use converge_lib::observability::{EventSink, TracingEventSink};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No instances found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// First eight characters of a commit sha
pub fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

/// Color a rollout status reported by the status API
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "running" => status.green().to_string(),
        "deploying" | "waiting" | "starting" => status.yellow().to_string(),
        "stopped" | "delayed" | "failed" => status.red().to_string(),
        _ => status.to_string(),
    }
}

pub fn color_ready(ready: bool) -> String {
    if ready {
        "yes".green().to_string()
    } else {
        "no".red().to_string()
    }
}

/// Prints deploy events to the terminal and forwards them to `tracing`
#[derive(Debug, Default)]
pub struct ConsoleEventSink {
    tracing: TracingEventSink,
}

impl EventSink for ConsoleEventSink {
    fn emit(&self, service: &str, line: &str, component: &str, level: &str) {
        print_info(line);
        self.tracing.emit(service, line, component, level);
    }
}
