//! Per-(loan, month) table and the 12-month forward delinquency windows.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::delinquency::{ensure_row_count, LoanFeatures};
use crate::performance::PerformanceRecord;
use crate::pipeline::PipelineError;
use crate::sentinel::{NEVER_OBSERVED, UNKNOWN_BALANCE};

/// Number of month-bucket offsets, one per calendar month.
pub const WINDOW_OFFSETS: i32 = 12;
/// Origin subtracted from the linear month index before bucketing
/// (year 2000 * 12).
pub const BUCKET_ORIGIN: i64 = 24_000;
/// Worst status within a window must exceed this to count as serious.
pub const SERIOUS_DELINQUENCY_THRESHOLD: i32 = 3;

/// One performance row with its provisional monthly values and the
/// loan-level features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoanMonth {
    pub loan_id: i64,
    pub timestamp: NaiveDate,
    pub timestamp_year: i32,
    pub timestamp_month: u32,
    pub delinquency_12: i32,
    pub upb_12: f64,
    pub features: LoanFeatures,
}

/// Worst-case aggregate over one 12-month window, keyed by the month whose
/// label it provides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollingAggregate {
    pub loan_id: i64,
    pub timestamp_year: i32,
    pub timestamp_month: u32,
    pub delinquency_12: i32,
    pub upb_12: f64,
}

/// A loan month after the rolling aggregates replaced the provisional values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoanMonthFeatures {
    pub loan_id: i64,
    pub timestamp: NaiveDate,
    pub timestamp_year: i32,
    pub timestamp_month: u32,
    pub features: LoanFeatures,
    pub delinquency_12: Option<i32>,
    pub upb_12: Option<f64>,
}

/// Linear month index: `year * 12 + month`.
pub fn month_bucket(year: i32, month: u32) -> i64 {
    i64::from(year) * 12 + i64::from(month)
}

/// Bucket of `months` for window offset `offset` (1..=12). All months of one
/// window share a bucket.
pub fn window_bucket(months: i64, offset: i32) -> i64 {
    (months - BUCKET_ORIGIN - i64::from(offset)).div_euclid(12)
}

/// Year of the month that the window `(bucket, offset)` labels.
pub fn bucket_target_year(bucket: i64, offset: i32) -> i32 {
    let year = (bucket * 12 + BUCKET_ORIGIN + i64::from(offset - 1)).div_euclid(12);
    year as i32
}

pub fn build_monthly_table(
    records: &[PerformanceRecord],
    loans: &[LoanFeatures],
) -> Result<Vec<LoanMonth>, PipelineError> {
    let mut index: HashMap<i64, &LoanFeatures> = HashMap::with_capacity(loans.len());
    for loan in loans {
        if index.insert(loan.loan_id, loan).is_some() {
            return Err(PipelineError::JoinFanOut {
                stage: "monthly_join",
                key: loan.loan_id.to_string(),
            });
        }
    }

    let months: Vec<LoanMonth> = records
        .iter()
        .map(|record| LoanMonth {
            loan_id: record.loan_id,
            timestamp: record.monthly_reporting_period,
            timestamp_year: record.monthly_reporting_period.year(),
            timestamp_month: record.monthly_reporting_period.month(),
            delinquency_12: record
                .current_loan_delinquency_status
                .unwrap_or(NEVER_OBSERVED as i32),
            upb_12: record.current_actual_upb.unwrap_or(UNKNOWN_BALANCE),
            features: index
                .get(&record.loan_id)
                .map_or_else(|| LoanFeatures::missing(record.loan_id), |f| **f),
        })
        .collect();

    ensure_row_count("monthly_join", records.len(), months.len())?;
    Ok(months)
}

/// Computes the window aggregates for every offset and concatenates them in
/// offset order. Within one offset rows are ordered by (loan, bucket).
pub fn compute_rolling_aggregates(months: &[LoanMonth]) -> Vec<RollingAggregate> {
    let mut out = Vec::new();
    for offset in 1..=WINDOW_OFFSETS {
        let mut windows: BTreeMap<(i64, i64), (i32, f64)> = BTreeMap::new();
        for month in months {
            let bucket = window_bucket(
                month_bucket(month.timestamp_year, month.timestamp_month),
                offset,
            );
            windows
                .entry((month.loan_id, bucket))
                .and_modify(|(max_delinquency, min_upb)| {
                    *max_delinquency = (*max_delinquency).max(month.delinquency_12);
                    *min_upb = min_upb.min(month.upb_12);
                })
                .or_insert((month.delinquency_12, month.upb_12));
        }

        debug!(
            component = "rolling",
            event = "rolling.offset.aggregated",
            offset,
            windows = windows.len()
        );

        out.extend(
            windows
                .into_iter()
                .map(|((loan_id, bucket), (max_delinquency, min_upb))| {
                    RollingAggregate {
                        loan_id,
                        timestamp_year: bucket_target_year(bucket, offset),
                        timestamp_month: offset as u32,
                        delinquency_12: window_label(max_delinquency, min_upb),
                        upb_12: min_upb,
                    }
                }),
        );
    }
    out
}

/// Serious delinquency plus zero balance, added rather than OR-ed; 2 is a
/// legal value and any positive value is delinquent downstream.
pub fn window_label(max_delinquency: i32, min_upb: f64) -> i32 {
    i32::from(max_delinquency > SERIOUS_DELINQUENCY_THRESHOLD) + i32::from(min_upb == 0.0)
}

/// Replaces the provisional monthly values with the aggregate whose target is
/// the row's own (loan, year, month).
pub fn rebucket_join(
    months: &[LoanMonth],
    aggregates: &[RollingAggregate],
) -> Result<Vec<LoanMonthFeatures>, PipelineError> {
    let mut index: HashMap<(i64, i32, u32), &RollingAggregate> =
        HashMap::with_capacity(aggregates.len());
    for agg in aggregates {
        let key = (agg.loan_id, agg.timestamp_year, agg.timestamp_month);
        if index.insert(key, agg).is_some() {
            return Err(PipelineError::JoinFanOut {
                stage: "rebucket_join",
                key: format!("{}/{}-{:02}", key.0, key.1, key.2),
            });
        }
    }

    let joined: Vec<LoanMonthFeatures> = months
        .iter()
        .map(|month| {
            let agg = index.get(&(month.loan_id, month.timestamp_year, month.timestamp_month));
            LoanMonthFeatures {
                loan_id: month.loan_id,
                timestamp: month.timestamp,
                timestamp_year: month.timestamp_year,
                timestamp_month: month.timestamp_month,
                features: month.features,
                delinquency_12: agg.map(|a| a.delinquency_12),
                upb_12: agg.map(|a| a.upb_12),
            }
        })
        .collect();

    ensure_row_count("rebucket_join", months.len(), joined.len())?;
    Ok(joined)
}
