//! Mortgage delinquency feature pipeline.
//!
//! Turns quarterly loan acquisition and monthly performance files into a
//! numeric feature table labelled with 12-month forward serious delinquency:
//! - ingestion of the pipe-delimited inputs and seller-name normalization
//! - per-loan ever-delinquent flags and onset dates
//! - the per-(loan, month) table and rolling 12-month windows
//! - the performance/acquisition join and final `f32` assembly on polars
//!   frames
//! - a rayon worker pool running one partition per performance split file

mod assembly;
mod category;
mod config;
mod delinquency;
mod export;
mod ingest;
mod monthly;
mod observability;
mod partitions;
mod performance;
mod pipeline;
mod schema;
mod sentinel;

pub use assembly::{
    assemble_features, join_performance_acquisition, loan_month_frame, null_workaround,
    FeatureColumn, FeatureDType, FeatureSchema, FeatureTable, FEATURE_SCHEMA_VERSION,
    LABEL_COLUMN,
};
pub use category::{merge_dictionaries, CategoryDictionary, CATEGORY_DICTIONARY_VERSION};
pub use config::{etl_config_from_env, ConfigError, EtlConfig};
pub use delinquency::{
    compute_ever_features, compute_onset_features, first_crossings, join_ever_onset,
    EverFeature, LoanFeatures, Onset, OnsetFeature, THRESHOLD_180, THRESHOLD_30, THRESHOLD_90,
};
pub use export::{read_schema_sidecar, write_feature_table, ExportError, ExportPaths, SchemaSidecar};
pub use ingest::{
    load_acquisition, load_performance, load_seller_names, load_table, normalize_seller_names,
    parse_date, parse_table, IngestConfig, IngestError, SellerNameMap,
};
pub use monthly::{
    bucket_target_year, build_monthly_table, compute_rolling_aggregates, month_bucket,
    rebucket_join, window_bucket, window_label, LoanMonth, LoanMonthFeatures, RollingAggregate,
    BUCKET_ORIGIN, SERIOUS_DELINQUENCY_THRESHOLD, WINDOW_OFFSETS,
};
pub use observability::{
    init_logging, log_app_start, log_run_config, log_run_summary, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use partitions::{acquisition_path, discover_performance_files, plan_partitions, plan_quarters};
pub use performance::{performance_records, PerformanceRecord};
pub use pipeline::{
    assign_workers, gather_by_worker, process_partition, process_partitions, select_partitions,
    split_labels, transform_partition, PartitionError, PartitionFailure, PartitionOutput,
    PartitionReport, PartitionRequest, PipelineError, RunOutcome, TrainingShard,
};
pub use schema::{
    column_names, ColumnKind, ColumnSpec, ACQUISITION_SCHEMA, FINAL_DROP_COLUMNS,
    PERFORMANCE_SCHEMA, SELLER_NAME_SCHEMA,
};
pub use sentinel::{
    date_to_epoch_days, date_to_epoch_millis, epoch_days_to_date, forward_fill_placeholder,
    FORWARD_FILL_PLACEHOLDER_MILLIS, MISSING_VALUE, NEVER_OBSERVED, UNKNOWN_BALANCE,
};
