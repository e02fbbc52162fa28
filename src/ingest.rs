//! Pipe-delimited ingestion adapters for the acquisition, performance and
//! seller-name mapping files.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::StringRecord;
use polars::prelude::*;
use thiserror::Error;
use tracing::{info, warn};
use ::zip::ZipArchive;

use crate::schema::{
    ColumnKind, ColumnSpec, ACQUISITION_SCHEMA, CURRENT_LOAN_DELINQUENCY_STATUS,
    NORMALIZED_SELLER_NAME, PERFORMANCE_SCHEMA, SELLER_NAME, SELLER_NAME_SCHEMA,
};
use crate::sentinel::date_to_epoch_days;

const DELIMITER: u8 = b'|';
const UNKNOWN_STATUS_MARKER: &str = "X";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub skip_header_rows: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            skip_header_rows: 1,
            max_retries: 2,
            retry_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("zip error: {0}")]
    Zip(#[from] ::zip::result::ZipError),
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("archive at {path} has no text entry")]
    MissingArchiveEntry { path: PathBuf },
    #[error("{source_name} line {line}: record has {found} columns, expected {expected}")]
    InvalidRecordColumns {
        source_name: String,
        line: u64,
        found: usize,
        expected: usize,
    },
    #[error("{source_name} line {line}: failed to parse field {field} value '{value}'")]
    ParseField {
        source_name: String,
        line: u64,
        field: &'static str,
        value: String,
    },
    #[error("seller name '{0}' is mapped more than once")]
    DuplicateSellerName(String),
}

/// Canonical seller names keyed by the raw acquisition label.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SellerNameMap {
    mapping: BTreeMap<String, String>,
}

impl SellerNameMap {
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, IngestError> {
        let mut mapping = BTreeMap::new();
        for (raw, normalized) in pairs {
            if mapping
                .insert(raw.to_string(), normalized.to_string())
                .is_some()
            {
                return Err(IngestError::DuplicateSellerName(raw.to_string()));
            }
        }
        Ok(Self { mapping })
    }

    pub fn from_frame(frame: &DataFrame) -> Result<Self, IngestError> {
        let raw = frame.column(SELLER_NAME)?.as_materialized_series().str()?;
        let new = frame
            .column(NORMALIZED_SELLER_NAME)?
            .as_materialized_series()
            .str()?;

        let pairs: Vec<(&str, &str)> = raw
            .into_iter()
            .zip(new)
            .filter_map(|(raw, new)| Some((raw?, new?)))
            .collect();
        Self::from_pairs(pairs)
    }

    pub fn normalize(&self, raw: &str) -> Option<&str> {
        self.mapping.get(raw).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

pub fn load_performance(path: &Path, cfg: &IngestConfig) -> Result<DataFrame, IngestError> {
    load_table(path, &PERFORMANCE_SCHEMA, cfg)
}

pub fn load_acquisition(path: &Path, cfg: &IngestConfig) -> Result<DataFrame, IngestError> {
    load_table(path, &ACQUISITION_SCHEMA, cfg)
}

pub fn load_seller_names(path: &Path, cfg: &IngestConfig) -> Result<SellerNameMap, IngestError> {
    let frame = load_table(path, &SELLER_NAME_SCHEMA, cfg)?;
    let names = SellerNameMap::from_frame(&frame)?;
    info!(
        component = "ingest",
        event = "ingest.seller_names.loaded",
        path = %path.display(),
        mappings = names.len()
    );
    Ok(names)
}

/// Replaces acquisition seller names with their canonical form. Names without
/// a mapping become null, matching a left lookup join.
pub fn normalize_seller_names(
    mut acquisition: DataFrame,
    names: &SellerNameMap,
) -> Result<DataFrame, IngestError> {
    let raw = acquisition
        .column(SELLER_NAME)?
        .as_materialized_series()
        .str()?;
    let mut unmapped = 0usize;
    let normalized: Vec<Option<&str>> = raw
        .into_iter()
        .map(|label| {
            let mapped = names.normalize(label?);
            if mapped.is_none() {
                unmapped += 1;
            }
            mapped
        })
        .collect();

    if unmapped > 0 {
        warn!(
            component = "ingest",
            event = "ingest.seller_names.unmapped",
            unmapped_rows = unmapped
        );
    }

    acquisition.with_column(Column::new(SELLER_NAME.into(), normalized))?;
    Ok(acquisition)
}

pub fn load_table(
    path: &Path,
    schema: &[ColumnSpec],
    cfg: &IngestConfig,
) -> Result<DataFrame, IngestError> {
    let bytes = retry(cfg, path, || read_source_bytes(path))?;
    let source_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let frame = parse_table(Cursor::new(bytes), schema, cfg.skip_header_rows, &source_name)?;

    info!(
        component = "ingest",
        event = "ingest.file.loaded",
        path = %path.display(),
        rows = frame.height(),
        columns = frame.width()
    );
    Ok(frame)
}

/// Parses pipe-delimited records against a fixed schema into a typed frame:
/// `Int64`, `Float64`, `Date` and `String` columns for the four column kinds.
/// A single trailing empty field (line ending in `|`) is tolerated; any other
/// column count is a schema mismatch.
pub fn parse_table<R: Read>(
    reader: R,
    schema: &[ColumnSpec],
    skip_rows: usize,
    source_name: &str,
) -> Result<DataFrame, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(DELIMITER)
        .quoting(false)
        .flexible(true)
        .from_reader(reader);

    let mut builders: Vec<ColumnBuilder> =
        schema.iter().map(|spec| ColumnBuilder::new(*spec)).collect();

    for record in reader.records().skip(skip_rows) {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        check_width(&record, schema.len(), source_name, line)?;
        for (idx, builder) in builders.iter_mut().enumerate() {
            let raw = record.get(idx).unwrap_or_default();
            builder.push(raw).map_err(|value| IngestError::ParseField {
                source_name: source_name.to_string(),
                line,
                field: builder.spec.name,
                value,
            })?;
        }
    }

    let columns = builders
        .into_iter()
        .map(ColumnBuilder::finish)
        .collect::<PolarsResult<Vec<Column>>>()?;
    Ok(DataFrame::new(columns)?)
}

fn check_width(
    record: &StringRecord,
    expected: usize,
    source_name: &str,
    line: u64,
) -> Result<(), IngestError> {
    let found = record.len();
    let trailing_empty = found == expected + 1 && record.get(expected) == Some("");
    if found == expected || trailing_empty {
        return Ok(());
    }
    Err(IngestError::InvalidRecordColumns {
        source_name: source_name.to_string(),
        line,
        found,
        expected,
    })
}

enum ColumnValuesBuilder {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    /// Days since the Unix epoch.
    Date(Vec<Option<i32>>),
    Category(Vec<Option<String>>),
}

struct ColumnBuilder {
    spec: ColumnSpec,
    values: ColumnValuesBuilder,
}

impl ColumnBuilder {
    fn new(spec: ColumnSpec) -> Self {
        let values = match spec.kind {
            ColumnKind::Int => ColumnValuesBuilder::Int(Vec::new()),
            ColumnKind::Float => ColumnValuesBuilder::Float(Vec::new()),
            ColumnKind::Date => ColumnValuesBuilder::Date(Vec::new()),
            ColumnKind::Category => ColumnValuesBuilder::Category(Vec::new()),
        };
        Self { spec, values }
    }

    /// Returns the offending raw value on failure.
    fn push(&mut self, raw: &str) -> Result<(), String> {
        let raw = raw.trim();
        let is_null = raw.is_empty()
            || (self.spec.name == CURRENT_LOAN_DELINQUENCY_STATUS && raw == UNKNOWN_STATUS_MARKER);

        match &mut self.values {
            ColumnValuesBuilder::Int(values) => {
                let value = if is_null {
                    None
                } else {
                    Some(raw.parse::<i64>().map_err(|_| raw.to_string())?)
                };
                values.push(value);
            }
            ColumnValuesBuilder::Float(values) => {
                let value = if is_null {
                    None
                } else {
                    Some(raw.parse::<f64>().map_err(|_| raw.to_string())?)
                };
                values.push(value);
            }
            ColumnValuesBuilder::Date(values) => {
                let value = if is_null {
                    None
                } else {
                    let date = parse_date(raw).ok_or_else(|| raw.to_string())?;
                    Some(date_to_epoch_days(date))
                };
                values.push(value);
            }
            ColumnValuesBuilder::Category(values) => {
                values.push((!is_null).then(|| raw.to_string()));
            }
        }
        Ok(())
    }

    fn finish(self) -> PolarsResult<Column> {
        let name = PlSmallStr::from_static(self.spec.name);
        let column = match self.values {
            ColumnValuesBuilder::Int(values) => Column::new(name, values),
            ColumnValuesBuilder::Float(values) => Column::new(name, values),
            ColumnValuesBuilder::Date(days) => Column::new(name, days).cast(&DataType::Date)?,
            ColumnValuesBuilder::Category(labels) => Column::new(name, labels),
        };
        Ok(column)
    }
}

/// Accepts `MM/DD/YYYY`, `MM/YYYY` (first of month) and `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%m/%d/%Y") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    let (month, year) = raw.split_once('/')?;
    let month = month.parse::<u32>().ok()?;
    let year = year.parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn read_source_bytes(path: &Path) -> Result<Vec<u8>, IngestError> {
    let is_zip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);
    if !is_zip {
        return Ok(fs::read(path)?);
    }

    let file = fs::File::open(path)?;
    let mut zip = ZipArchive::new(file)?;
    for idx in 0..zip.len() {
        let mut entry = zip.by_index(idx)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_ascii_lowercase();
        if !(name.ends_with(".txt") || name.ends_with(".csv")) {
            continue;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        return Ok(buf);
    }

    Err(IngestError::MissingArchiveEntry {
        path: path.to_path_buf(),
    })
}

/// Retries only transient I/O failures; a malformed archive fails at once.
fn retry<T>(
    cfg: &IngestConfig,
    path: &Path,
    mut f: impl FnMut() -> Result<T, IngestError>,
) -> Result<T, IngestError> {
    let mut attempt: u32 = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= cfg.max_retries || !is_retryable(&err) => return Err(err),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let shift = attempt.saturating_sub(1).min(10);
                let sleep_ms = cfg.retry_backoff_ms.saturating_mul(1u64 << shift);
                warn!(
                    component = "ingest",
                    event = "ingest.file.retry",
                    path = %path.display(),
                    attempt,
                    sleep_ms,
                    error = %err
                );
                std::thread::sleep(std::time::Duration::from_millis(sleep_ms));
            }
        }
    }
}

fn is_retryable(err: &IngestError) -> bool {
    match err {
        IngestError::Io(io) => io.kind() != std::io::ErrorKind::NotFound,
        IngestError::Zip(::zip::result::ZipError::Io(_)) => true,
        _ => false,
    }
}
