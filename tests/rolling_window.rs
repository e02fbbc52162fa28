use chrono::{Datelike, NaiveDate};
use mortgage_etl::{
    build_monthly_table, compute_ever_features, compute_onset_features,
    compute_rolling_aggregates, join_ever_onset, month_bucket, rebucket_join, LoanMonth,
    PerformanceRecord, WINDOW_OFFSETS,
};

const LOAN: i64 = 77;

/// 13 consecutive months from Jan 2000; only the first is seriously
/// delinquent.
fn thirteen_months() -> Vec<PerformanceRecord> {
    let mut date = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
    let mut out = Vec::new();
    for idx in 0..13_i32 {
        out.push(PerformanceRecord {
            loan_id: LOAN,
            monthly_reporting_period: date,
            current_loan_delinquency_status: Some(if idx == 0 { 4 } else { 0 }),
            current_actual_upb: Some(100_000.0 - f64::from(idx) * 100.0),
        });
        date = date.checked_add_months(chrono::Months::new(1)).unwrap();
    }
    out
}

fn monthly(records: &[PerformanceRecord]) -> Vec<LoanMonth> {
    let ever = compute_ever_features(records);
    let onset = compute_onset_features(records);
    let loans = join_ever_onset(&ever, &onset).unwrap();
    build_monthly_table(records, &loans).unwrap()
}

#[test]
fn windows_spanning_the_delinquent_month_are_labelled() {
    let records = thirteen_months();
    let months = monthly(&records);
    let aggregates = compute_rolling_aggregates(&months);
    let delinquent_month = month_bucket(2000, 1);

    assert!(!aggregates.is_empty());
    for agg in &aggregates {
        let first = month_bucket(agg.timestamp_year, agg.timestamp_month);
        let spans_delinquent = (first..first + 12).contains(&delinquent_month);
        assert_eq!(
            agg.delinquency_12,
            i32::from(spans_delinquent),
            "window starting {}-{:02}",
            agg.timestamp_year,
            agg.timestamp_month
        );
    }

    let offsets: std::collections::BTreeSet<u32> =
        aggregates.iter().map(|a| a.timestamp_month).collect();
    assert_eq!(offsets.len(), WINDOW_OFFSETS as usize);
}

#[test]
fn each_month_takes_the_window_that_starts_at_it() {
    let records = thirteen_months();
    let months = monthly(&records);
    let aggregates = compute_rolling_aggregates(&months);
    let joined = rebucket_join(&months, &aggregates).unwrap();

    assert_eq!(joined.len(), 13);
    for (row, record) in joined.iter().zip(&records) {
        assert_eq!(row.timestamp, record.monthly_reporting_period);
        let expected = if record.monthly_reporting_period.month() == 1
            && record.monthly_reporting_period.year() == 2000
        {
            1
        } else {
            0
        };
        assert_eq!(row.delinquency_12, Some(expected));
        assert!(row.upb_12.is_some());
    }
}

#[test]
fn window_upb_is_the_minimum_balance_in_span() {
    let records = thirteen_months();
    let months = monthly(&records);
    let joined = rebucket_join(&months, &compute_rolling_aggregates(&months)).unwrap();

    // Jan 2000 spans Jan..Dec 2000; the lowest balance there is month 12.
    assert_eq!(joined[0].upb_12, Some(100_000.0 - 11.0 * 100.0));
    // Jan 2001 only sees itself.
    assert_eq!(joined[12].upb_12, Some(100_000.0 - 12.0 * 100.0));
}
