//! Run configuration read from `MORTGAGE_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::ingest::IngestConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlConfig {
    pub acquisition_dir: PathBuf,
    pub performance_dir: PathBuf,
    pub names_path: PathBuf,
    pub start_year: i32,
    /// Inclusive.
    pub end_year: i32,
    pub part_count: usize,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub skip_header_rows: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self::with_data_root(PathBuf::from("data/mortgage"))
    }
}

impl EtlConfig {
    /// Defaults with the input layout `<root>/acq`, `<root>/perf` and
    /// `<root>/names.csv`.
    pub fn with_data_root(root: PathBuf) -> Self {
        let ingest = IngestConfig::default();
        Self {
            acquisition_dir: root.join("acq"),
            performance_dir: root.join("perf"),
            names_path: root.join("names.csv"),
            start_year: 2000,
            end_year: 2001,
            part_count: 1,
            output_dir: root.join("features"),
            workers: default_workers(),
            skip_header_rows: ingest.skip_header_rows,
            max_retries: ingest.max_retries,
            retry_backoff_ms: ingest.retry_backoff_ms,
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            skip_header_rows: self.skip_header_rows,
            max_retries: self.max_retries,
            retry_backoff_ms: self.retry_backoff_ms,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_year > self.end_year {
            return Err(ConfigError::InvalidYearRange {
                start: self.start_year,
                end: self.end_year,
            });
        }
        if self.part_count == 0 {
            return Err(ConfigError::ZeroPartCount);
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("start year {start} is after end year {end}")]
    InvalidYearRange { start: i32, end: i32 },
    #[error("part count must be at least 1")]
    ZeroPartCount,
    #[error("worker count must be at least 1")]
    ZeroWorkers,
}

/// Unparsable values keep the default.
pub fn etl_config_from_env() -> EtlConfig {
    let mut config = match env_string("MORTGAGE_DATA_ROOT") {
        Some(root) => EtlConfig::with_data_root(PathBuf::from(root)),
        None => EtlConfig::default(),
    };

    if let Some(dir) = env_string("MORTGAGE_ACQ_DIR") {
        config.acquisition_dir = PathBuf::from(dir);
    }
    if let Some(dir) = env_string("MORTGAGE_PERF_DIR") {
        config.performance_dir = PathBuf::from(dir);
    }
    if let Some(path) = env_string("MORTGAGE_NAMES_PATH") {
        config.names_path = PathBuf::from(path);
    }
    if let Some(dir) = env_string("MORTGAGE_OUTPUT_DIR") {
        config.output_dir = PathBuf::from(dir);
    }
    if let Some(year) = env_parsed("MORTGAGE_START_YEAR") {
        config.start_year = year;
    }
    if let Some(year) = env_parsed("MORTGAGE_END_YEAR") {
        config.end_year = year;
    }
    if let Some(count) = env_parsed("MORTGAGE_PART_COUNT") {
        config.part_count = count;
    }
    if let Some(workers) = env_parsed("MORTGAGE_WORKERS") {
        config.workers = workers;
    }
    if let Some(rows) = env_parsed("MORTGAGE_SKIP_HEADER_ROWS") {
        config.skip_header_rows = rows;
    }
    if let Some(retries) = env_parsed("MORTGAGE_MAX_RETRIES") {
        config.max_retries = retries;
    }
    if let Some(backoff) = env_parsed("MORTGAGE_RETRY_BACKOFF_MS") {
        config.retry_backoff_ms = backoff;
    }

    config
}

fn env_string(key: &str) -> Option<String> {
    let raw = env::var(key).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    env_string(key)?.parse().ok()
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
