//! Per-loan delinquency features: ever-delinquent flags, onset dates and
//! their merge.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::performance::PerformanceRecord;
use crate::pipeline::PipelineError;
use crate::sentinel::{
    date_to_epoch_millis, forward_fill_placeholder, FORWARD_FILL_PLACEHOLDER_MILLIS,
    NEVER_OBSERVED,
};

pub const THRESHOLD_30: i32 = 1;
pub const THRESHOLD_90: i32 = 3;
pub const THRESHOLD_180: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EverFeature {
    pub loan_id: i64,
    pub ever_30: i8,
    pub ever_90: i8,
    pub ever_180: i8,
}

/// Earliest crossing of one severity threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Onset {
    Reached(NaiveDate),
    /// Loan crossed a lower threshold but never this one (1970-01-01).
    Placeholder,
    /// Loan has no onset row at all.
    NeverObserved,
}

impl Onset {
    pub fn as_epoch_millis(self) -> i64 {
        match self {
            Self::Reached(date) => date_to_epoch_millis(date),
            Self::Placeholder => FORWARD_FILL_PLACEHOLDER_MILLIS,
            Self::NeverObserved => NEVER_OBSERVED,
        }
    }

    /// Calendar date of the onset; the placeholder reads as 1970-01-01.
    pub fn date(self) -> Option<NaiveDate> {
        match self {
            Self::Reached(date) => Some(date),
            Self::Placeholder => Some(forward_fill_placeholder()),
            Self::NeverObserved => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnsetFeature {
    pub loan_id: i64,
    pub delinquency_30: Onset,
    pub delinquency_90: Onset,
    pub delinquency_180: Onset,
}

/// Output of the ever/onset merge: one row per loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanFeatures {
    pub loan_id: i64,
    pub ever_30: i8,
    pub ever_90: i8,
    pub ever_180: i8,
    pub delinquency_30: Onset,
    pub delinquency_90: Onset,
    pub delinquency_180: Onset,
}

impl LoanFeatures {
    /// Fill used when a loan-month has no loan-level row.
    pub fn missing(loan_id: i64) -> Self {
        let never = NEVER_OBSERVED as i8;
        Self {
            loan_id,
            ever_30: never,
            ever_90: never,
            ever_180: never,
            delinquency_30: Onset::NeverObserved,
            delinquency_90: Onset::NeverObserved,
            delinquency_180: Onset::NeverObserved,
        }
    }
}

/// One row per distinct loan, ordered by loan id. Null statuses are skipped;
/// a loan with only null statuses gets all flags 0.
pub fn compute_ever_features(records: &[PerformanceRecord]) -> Vec<EverFeature> {
    let mut max_status: BTreeMap<i64, Option<i32>> = BTreeMap::new();
    for record in records {
        let slot = max_status.entry(record.loan_id).or_insert(None);
        if let Some(status) = record.current_loan_delinquency_status {
            *slot = Some(slot.map_or(status, |current| current.max(status)));
        }
    }

    max_status
        .into_iter()
        .map(|(loan_id, max)| {
            let meets = |threshold: i32| i8::from(max.map_or(false, |m| m >= threshold));
            EverFeature {
                loan_id,
                ever_30: meets(THRESHOLD_30),
                ever_90: meets(THRESHOLD_90),
                ever_180: meets(THRESHOLD_180),
            }
        })
        .collect()
}

/// Earliest reporting period with status >= `threshold`, per loan. Loans that
/// never cross the threshold are absent.
pub fn first_crossings(
    records: &[PerformanceRecord],
    threshold: i32,
) -> BTreeMap<i64, NaiveDate> {
    let mut earliest: BTreeMap<i64, NaiveDate> = BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| r.current_loan_delinquency_status.map_or(false, |s| s >= threshold))
    {
        earliest
            .entry(record.loan_id)
            .and_modify(|date| *date = (*date).min(record.monthly_reporting_period))
            .or_insert(record.monthly_reporting_period);
    }
    earliest
}

/// Left-joins the 90 and 180 day crossings onto the 30 day crossings.
pub fn compute_onset_features(records: &[PerformanceRecord]) -> Vec<OnsetFeature> {
    let onset_30 = first_crossings(records, THRESHOLD_30);
    let onset_90 = first_crossings(records, THRESHOLD_90);
    let onset_180 = first_crossings(records, THRESHOLD_180);

    let lookup = |table: &BTreeMap<i64, NaiveDate>, loan_id: i64| {
        table
            .get(&loan_id)
            .map_or(Onset::Placeholder, |date| Onset::Reached(*date))
    };

    let features: Vec<OnsetFeature> = onset_30
        .iter()
        .map(|(loan_id, date)| OnsetFeature {
            loan_id: *loan_id,
            delinquency_30: Onset::Reached(*date),
            delinquency_90: lookup(&onset_90, *loan_id),
            delinquency_180: lookup(&onset_180, *loan_id),
        })
        .collect();

    debug!(
        component = "delinquency",
        event = "delinquency.onset.computed",
        loans_30 = onset_30.len(),
        loans_90 = onset_90.len(),
        loans_180 = onset_180.len()
    );
    features
}

/// Left join with the ever features as base. Loans without an onset row get
/// [`Onset::NeverObserved`] for every threshold.
pub fn join_ever_onset(
    ever: &[EverFeature],
    onset: &[OnsetFeature],
) -> Result<Vec<LoanFeatures>, PipelineError> {
    let mut index: HashMap<i64, &OnsetFeature> = HashMap::with_capacity(onset.len());
    for row in onset {
        if index.insert(row.loan_id, row).is_some() {
            return Err(PipelineError::JoinFanOut {
                stage: "ever_onset_join",
                key: row.loan_id.to_string(),
            });
        }
    }

    let joined: Vec<LoanFeatures> = ever
        .iter()
        .map(|e| {
            let onset = index.get(&e.loan_id).copied();
            LoanFeatures {
                loan_id: e.loan_id,
                ever_30: e.ever_30,
                ever_90: e.ever_90,
                ever_180: e.ever_180,
                delinquency_30: onset.map_or(Onset::NeverObserved, |o| o.delinquency_30),
                delinquency_90: onset.map_or(Onset::NeverObserved, |o| o.delinquency_90),
                delinquency_180: onset.map_or(Onset::NeverObserved, |o| o.delinquency_180),
            }
        })
        .collect();

    ensure_row_count("ever_onset_join", ever.len(), joined.len())?;
    Ok(joined)
}

pub(crate) fn ensure_row_count(
    stage: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), PipelineError> {
    if expected != actual {
        return Err(PipelineError::RowCountMismatch {
            stage,
            expected,
            actual,
        });
    }
    Ok(())
}
