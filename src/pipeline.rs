//! Per-partition stage sequence and the worker pool that runs it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use polars::prelude::{DataFrame, PolarsError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, Dispatch};

use crate::assembly::{
    assemble_features, join_performance_acquisition, loan_month_frame, FeatureTable, LABEL_COLUMN,
};
use crate::category::merge_dictionaries;
use crate::delinquency::{compute_ever_features, compute_onset_features, join_ever_onset};
use crate::ingest::{
    load_acquisition, load_performance, normalize_seller_names, IngestConfig, IngestError,
    SellerNameMap,
};
use crate::monthly::{build_monthly_table, compute_rolling_aggregates, rebucket_join};
use crate::performance::performance_records;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("row {row} has no value for required column {column}")]
    MissingKey { column: &'static str, row: usize },
    #[error("value {value} in column {column} is out of range")]
    ValueOutOfRange { column: &'static str, value: i64 },
    #[error("join {stage} matched key {key} more than once")]
    JoinFanOut { stage: &'static str, key: String },
    #[error("stage {stage} produced {actual} rows, expected {expected}")]
    RowCountMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("feature schema mismatch: expected {expected}, got {actual}")]
    SchemaMismatch { expected: String, actual: String },
    #[error("category dictionaries for column {column} do not agree")]
    CategoryMismatch { column: String },
    #[error("code {code} has no label in the dictionary of column {column}")]
    UnknownCategoryCode { column: String, code: u32 },
    #[error("feature table has no label column")]
    MissingLabel,
    #[error("worker pool: {0}")]
    WorkerPool(String),
}

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Row counts observed while a partition moved through the stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub performance_rows: usize,
    pub loans: usize,
    pub delinquent_loans: usize,
    pub rolling_aggregates: usize,
    pub feature_rows: usize,
    pub feature_columns: usize,
    pub positive_labels: usize,
}

/// One performance split file of a quarter plus the quarter's acquisition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRequest {
    pub year: i32,
    pub quarter: u32,
    pub performance_path: PathBuf,
    pub acquisition_path: PathBuf,
}

impl PartitionRequest {
    pub fn quarter_label(&self) -> String {
        format!("{}Q{}", self.year, self.quarter)
    }
}

#[derive(Debug, Clone)]
pub struct PartitionOutput {
    pub request: PartitionRequest,
    pub worker: usize,
    pub table: FeatureTable,
    pub report: PartitionReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    pub request: PartitionRequest,
    pub worker: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub outputs: Vec<PartitionOutput>,
    pub failures: Vec<PartitionFailure>,
}

/// Label vector and feature columns of one gathered table.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingShard {
    pub labels: Vec<f32>,
    pub feature_names: Vec<String>,
    pub features: Vec<Vec<f32>>,
}

impl TrainingShard {
    pub fn row_count(&self) -> usize {
        self.labels.len()
    }
}

/// Runs the eight stages on one partition. `acquisition` must already carry
/// normalized seller names. Inputs are consumed and nothing is shared with
/// other partitions; category codes are local until [`gather_by_worker`].
pub fn transform_partition(
    performance: DataFrame,
    acquisition: DataFrame,
) -> Result<(FeatureTable, PartitionReport), PipelineError> {
    let records = performance_records(&performance)?;
    let ever = compute_ever_features(&records);
    let onset = compute_onset_features(&records);
    let loans = join_ever_onset(&ever, &onset)?;
    let months = build_monthly_table(&records, &loans)?;
    let aggregates = compute_rolling_aggregates(&months);
    let rebucketed = rebucket_join(&months, &aggregates)?;
    let loan_months = loan_month_frame(&rebucketed)?;
    let (joined, categories) =
        join_performance_acquisition(performance, loan_months, acquisition)?;
    let table = assemble_features(joined, &categories)?;

    let positive_labels = table
        .column(LABEL_COLUMN)
        .map_or(0, |labels| labels.iter().filter(|v| **v > 0.0).count());
    let report = PartitionReport {
        performance_rows: records.len(),
        loans: loans.len(),
        delinquent_loans: ever.iter().filter(|e| e.ever_30 == 1).count(),
        rolling_aggregates: aggregates.len(),
        feature_rows: table.row_count,
        feature_columns: table.schema.columns.len(),
        positive_labels,
    };
    Ok((table, report))
}

/// Loads, normalizes and transforms one partition.
pub fn process_partition(
    request: &PartitionRequest,
    names: &SellerNameMap,
    cfg: &IngestConfig,
) -> Result<(FeatureTable, PartitionReport), PartitionError> {
    let performance = load_performance(&request.performance_path, cfg)?;
    let acquisition = load_acquisition(&request.acquisition_path, cfg)?;
    let acquisition = normalize_seller_names(acquisition, names)?;
    Ok(transform_partition(performance, acquisition)?)
}

/// Runs every request on a pool of `workers` threads. Request `i` is owned by
/// worker `i % workers`, which runs its requests in order, so placement does
/// not depend on scheduling. A failing partition is logged and reported; it
/// never aborts the others. Outputs keep request order.
pub fn process_partitions(
    requests: &[PartitionRequest],
    names: &SellerNameMap,
    cfg: &IngestConfig,
    workers: usize,
) -> Result<RunOutcome, PipelineError> {
    let assignments = assign_workers(requests.len(), workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(assignments.len())
        .thread_name(|idx| format!("mortgage-etl-{idx}"))
        .build()
        .map_err(|err| PipelineError::WorkerPool(err.to_string()))?;

    // Worker threads log through the caller's subscriber, scoped or global.
    let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
    let per_worker: Vec<Vec<(usize, PartitionResult)>> = pool.install(|| {
        assignments
            .par_iter()
            .enumerate()
            .map(|(worker, indices)| {
                tracing::dispatcher::with_default(&dispatch, || {
                    indices
                        .iter()
                        .map(|&idx| (idx, run_one(&requests[idx], worker, names, cfg)))
                        .collect::<Vec<_>>()
                })
            })
            .collect()
    });

    let mut results: Vec<(usize, PartitionResult)> = per_worker.into_iter().flatten().collect();
    results.sort_by_key(|(idx, _)| *idx);

    let mut outcome = RunOutcome::default();
    for (_, result) in results {
        match result {
            Ok(output) => outcome.outputs.push(output),
            Err(failure) => outcome.failures.push(failure),
        }
    }
    Ok(outcome)
}

type PartitionResult = Result<PartitionOutput, PartitionFailure>;

/// Request indices owned by each worker, round-robin.
pub fn assign_workers(request_count: usize, workers: usize) -> Vec<Vec<usize>> {
    let workers = workers.max(1);
    let mut groups = vec![Vec::new(); workers];
    for idx in 0..request_count {
        groups[idx % workers].push(idx);
    }
    groups
}

fn run_one(
    request: &PartitionRequest,
    worker: usize,
    names: &SellerNameMap,
    cfg: &IngestConfig,
) -> PartitionResult {
    let started = Instant::now();
    info!(
        component = "pipeline",
        event = "pipeline.partition.start",
        quarter = %request.quarter_label(),
        path = %request.performance_path.display(),
        worker
    );

    match process_partition(request, names, cfg) {
        Ok((table, report)) => {
            info!(
                component = "pipeline",
                event = "pipeline.partition.complete",
                quarter = %request.quarter_label(),
                path = %request.performance_path.display(),
                worker,
                rows = report.feature_rows,
                loans = report.loans,
                positive_labels = report.positive_labels,
                elapsed_ms = started.elapsed().as_millis() as u64
            );
            Ok(PartitionOutput {
                request: request.clone(),
                worker,
                table,
                report,
            })
        }
        Err(err) => {
            error!(
                component = "pipeline",
                event = "pipeline.partition.failed",
                quarter = %request.quarter_label(),
                path = %request.performance_path.display(),
                worker,
                error = %err
            );
            Err(PartitionFailure {
                request: request.clone(),
                worker,
                error: err.to_string(),
            })
        }
    }
}

/// The first `part_count` successful outputs, in request order.
pub fn select_partitions(outputs: &[PartitionOutput], part_count: usize) -> &[PartitionOutput] {
    &outputs[..outputs.len().min(part_count)]
}

/// Concatenates the outputs of each worker into one table, ordered by worker
/// index. Category codes are first moved onto one dictionary per column built
/// from every output, so a code means the same label in every gathered table.
pub fn gather_by_worker(outputs: &[PartitionOutput]) -> Result<Vec<FeatureTable>, PipelineError> {
    let catalog = merge_dictionaries(outputs.iter().flat_map(|o| &o.table.categories));
    let mut groups: BTreeMap<usize, FeatureTable> = BTreeMap::new();
    for output in outputs {
        let table = output.table.recode(&catalog)?;
        let merged = match groups.remove(&output.worker) {
            Some(existing) => existing.concat(&table)?,
            None => table,
        };
        groups.insert(output.worker, merged);
    }
    Ok(groups.into_values().collect())
}

pub fn split_labels(table: &FeatureTable) -> Result<TrainingShard, PipelineError> {
    let label_idx = table
        .schema
        .column_index(&table.schema.label_column)
        .ok_or(PipelineError::MissingLabel)?;

    let mut feature_names = Vec::with_capacity(table.columns.len().saturating_sub(1));
    let mut features = Vec::with_capacity(table.columns.len().saturating_sub(1));
    for (idx, (column, values)) in table.schema.columns.iter().zip(&table.columns).enumerate() {
        if idx == label_idx {
            continue;
        }
        feature_names.push(column.name.clone());
        features.push(values.clone());
    }

    Ok(TrainingShard {
        labels: table.columns[label_idx].clone(),
        feature_names,
        features,
    })
}
