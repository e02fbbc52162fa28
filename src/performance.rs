//! Typed projection of the performance table used by the per-loan stages.

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineError;
use crate::schema::{
    CURRENT_ACTUAL_UPB, CURRENT_LOAN_DELINQUENCY_STATUS, LOAN_ID, MONTHLY_REPORTING_PERIOD,
};
use crate::sentinel::epoch_days_to_date;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub loan_id: i64,
    pub monthly_reporting_period: NaiveDate,
    pub current_loan_delinquency_status: Option<i32>,
    pub current_actual_upb: Option<f64>,
}

/// Projects the key fields out of a performance frame. `loan_id` and
/// `monthly_reporting_period` are required on every row.
pub fn performance_records(frame: &DataFrame) -> Result<Vec<PerformanceRecord>, PipelineError> {
    let loan_ids = frame.column(LOAN_ID)?.as_materialized_series().i64()?;
    let periods = frame.column(MONTHLY_REPORTING_PERIOD)?.cast(&DataType::Int32)?;
    let periods = periods.as_materialized_series().i32()?;
    let statuses = frame
        .column(CURRENT_LOAN_DELINQUENCY_STATUS)?
        .as_materialized_series()
        .i64()?;
    let upbs = frame
        .column(CURRENT_ACTUAL_UPB)?
        .as_materialized_series()
        .f64()?;

    let mut records = Vec::with_capacity(frame.height());
    for (row, (((loan_id, period), status), upb)) in loan_ids
        .into_iter()
        .zip(periods)
        .zip(statuses)
        .zip(upbs)
        .enumerate()
    {
        let loan_id = loan_id.ok_or(PipelineError::MissingKey {
            column: LOAN_ID,
            row,
        })?;
        let monthly_reporting_period = period.and_then(epoch_days_to_date).ok_or(
            PipelineError::MissingKey {
                column: MONTHLY_REPORTING_PERIOD,
                row,
            },
        )?;
        let current_loan_delinquency_status = status
            .map(|status| {
                i32::try_from(status).map_err(|_| PipelineError::ValueOutOfRange {
                    column: CURRENT_LOAN_DELINQUENCY_STATUS,
                    value: status,
                })
            })
            .transpose()?;

        records.push(PerformanceRecord {
            loan_id,
            monthly_reporting_period,
            current_loan_delinquency_status,
            current_actual_upb: upb,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parse_table;
    use crate::schema::PERFORMANCE_SCHEMA;

    fn row(loan_id: &str, period: &str, status: &str) -> String {
        let mut fields = vec![""; PERFORMANCE_SCHEMA.len()];
        fields[0] = loan_id;
        fields[1] = period;
        fields[4] = "1000.5";
        fields[10] = status;
        fields.join("|")
    }

    #[test]
    fn projects_typed_key_fields() {
        let body = format!("{}\n{}\n", row("5", "02/01/2000", "3"), row("6", "03/01/2000", ""));
        let frame = parse_table(body.as_bytes(), &PERFORMANCE_SCHEMA, 0, "perf").unwrap();

        let records = performance_records(&frame).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].loan_id, 5);
        assert_eq!(
            records[0].monthly_reporting_period,
            NaiveDate::from_ymd_opt(2000, 2, 1).unwrap()
        );
        assert_eq!(records[0].current_loan_delinquency_status, Some(3));
        assert_eq!(records[0].current_actual_upb, Some(1000.5));
        assert_eq!(records[1].current_loan_delinquency_status, None);
    }

    #[test]
    fn missing_reporting_period_is_rejected() {
        let body = format!("{}\n", row("5", "", "0"));
        let frame = parse_table(body.as_bytes(), &PERFORMANCE_SCHEMA, 0, "perf").unwrap();

        let err = performance_records(&frame).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingKey {
                column: MONTHLY_REPORTING_PERIOD,
                row: 0
            }
        ));
    }
}
