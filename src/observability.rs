//! Logging setup for the ETL binary and the run-level lifecycle events.

use std::env;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::EtlConfig;
use crate::pipeline::RunOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    /// Single-line human output, suited to batch job logs.
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_target: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `MORTGAGE_LOG_LEVEL`, `MORTGAGE_LOG_FORMAT` and `MORTGAGE_LOG_TARGET`.
/// Unrecognized values keep the default.
pub fn logging_config_from_env() -> LoggingConfig {
    let defaults = LoggingConfig::default();
    let read = |key: &str| env::var(key).ok().map(|raw| raw.trim().to_string());

    LoggingConfig {
        level: read("MORTGAGE_LOG_LEVEL")
            .filter(|level| !level.is_empty())
            .unwrap_or(defaults.level),
        format: read("MORTGAGE_LOG_FORMAT")
            .as_deref()
            .and_then(parse_log_format)
            .unwrap_or(defaults.format),
        include_target: read("MORTGAGE_LOG_TARGET")
            .as_deref()
            .and_then(parse_bool)
            .unwrap_or(defaults.include_target),
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_thread_names(true)
        .with_ansi(!matches!(config.format, LogFormat::Json));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "mortgage_etl",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        version = env!("CARGO_PKG_VERSION")
    );
}

pub fn log_run_config(config: &EtlConfig, partitions: usize) {
    info!(
        component = "mortgage_etl",
        event = "run.config",
        performance_dir = %config.performance_dir.display(),
        acquisition_dir = %config.acquisition_dir.display(),
        start_year = config.start_year,
        end_year = config.end_year,
        part_count = config.part_count,
        workers = config.workers,
        partitions
    );
}

/// Final tally of a run; warn level when any partition failed.
pub fn log_run_summary(outcome: &RunOutcome, gathered_tables: usize, output_dir: &Path) {
    let rows: usize = outcome.outputs.iter().map(|o| o.report.feature_rows).sum();
    let positive_labels: usize = outcome
        .outputs
        .iter()
        .map(|o| o.report.positive_labels)
        .sum();
    let partitions_ok = outcome.outputs.len();
    let partitions_failed = outcome.failures.len();

    if partitions_failed == 0 {
        info!(
            component = "mortgage_etl",
            event = "run.summary",
            partitions_ok,
            partitions_failed,
            gathered_tables,
            rows,
            positive_labels,
            output_dir = %output_dir.display()
        );
    } else {
        warn!(
            component = "mortgage_etl",
            event = "run.summary",
            partitions_ok,
            partitions_failed,
            gathered_tables,
            rows,
            positive_labels,
            output_dir = %output_dir.display()
        );
    }
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        "compact" | "text" => Some(LogFormat::Compact),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
