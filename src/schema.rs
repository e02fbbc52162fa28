//! Fixed column contracts for the pipe-delimited mortgage inputs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Int,
    Float,
    Date,
    Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn column(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec { name, kind }
}

pub const LOAN_ID: &str = "loan_id";
pub const MONTHLY_REPORTING_PERIOD: &str = "monthly_reporting_period";
pub const CURRENT_LOAN_DELINQUENCY_STATUS: &str = "current_loan_delinquency_status";
pub const CURRENT_ACTUAL_UPB: &str = "current_actual_upb";
pub const SELLER_NAME: &str = "seller_name";
pub const NORMALIZED_SELLER_NAME: &str = "new";

pub const TIMESTAMP: &str = "timestamp";
pub const TIMESTAMP_YEAR: &str = "timestamp_year";
pub const TIMESTAMP_MONTH: &str = "timestamp_month";
pub const EVER_30: &str = "ever_30";
pub const EVER_90: &str = "ever_90";
pub const EVER_180: &str = "ever_180";
pub const DELINQUENCY_30: &str = "delinquency_30";
pub const DELINQUENCY_90: &str = "delinquency_90";
pub const DELINQUENCY_180: &str = "delinquency_180";
pub const DELINQUENCY_12: &str = "delinquency_12";
pub const UPB_12: &str = "upb_12";

use ColumnKind::{Category, Date, Float, Int};

pub const PERFORMANCE_SCHEMA: [ColumnSpec; 31] = [
    column(LOAN_ID, Int),
    column(MONTHLY_REPORTING_PERIOD, Date),
    column("servicer", Category),
    column("interest_rate", Float),
    column(CURRENT_ACTUAL_UPB, Float),
    column("loan_age", Float),
    column("remaining_months_to_legal_maturity", Float),
    column("adj_remaining_months_to_maturity", Float),
    column("maturity_date", Date),
    column("msa", Float),
    column(CURRENT_LOAN_DELINQUENCY_STATUS, Int),
    column("mod_flag", Category),
    column("zero_balance_code", Category),
    column("zero_balance_effective_date", Date),
    column("last_paid_installment_date", Date),
    column("foreclosed_after", Date),
    column("disposition_date", Date),
    column("foreclosure_costs", Float),
    column("prop_preservation_and_repair_costs", Float),
    column("asset_recovery_costs", Float),
    column("misc_holding_expenses", Float),
    column("holding_taxes", Float),
    column("net_sale_proceeds", Float),
    column("credit_enhancement_proceeds", Float),
    column("repurchase_make_whole_proceeds", Float),
    column("other_foreclosure_proceeds", Float),
    column("non_interest_bearing_upb", Float),
    column("principal_forgiveness_upb", Float),
    column("repurchase_make_whole_proceeds_flag", Category),
    column("foreclosure_principal_write_off_amount", Float),
    column("servicing_activity_indicator", Category),
];

pub const ACQUISITION_SCHEMA: [ColumnSpec; 25] = [
    column(LOAN_ID, Int),
    column("orig_channel", Category),
    column(SELLER_NAME, Category),
    column("orig_interest_rate", Float),
    column("orig_upb", Int),
    column("orig_loan_term", Int),
    column("orig_date", Date),
    column("first_pay_date", Date),
    column("orig_ltv", Float),
    column("orig_cltv", Float),
    column("num_borrowers", Float),
    column("dti", Float),
    column("borrower_credit_score", Float),
    column("first_home_buyer", Category),
    column("loan_purpose", Category),
    column("property_type", Category),
    column("num_units", Int),
    column("occupancy_status", Category),
    column("property_state", Category),
    column("zip", Int),
    column("mortgage_insurance_percent", Float),
    column("product_type", Category),
    column("coborrow_credit_score", Float),
    column("mortgage_insurance_type", Float),
    column("relocation_mortgage_indicator", Category),
];

pub const SELLER_NAME_SCHEMA: [ColumnSpec; 2] = [
    column(SELLER_NAME, Category),
    column(NORMALIZED_SELLER_NAME, Category),
];

/// Identifier, date and outcome-adjacent columns removed before the feature
/// table is emitted.
pub const FINAL_DROP_COLUMNS: [&str; 18] = [
    LOAN_ID,
    "orig_date",
    "first_pay_date",
    SELLER_NAME,
    MONTHLY_REPORTING_PERIOD,
    "last_paid_installment_date",
    "maturity_date",
    EVER_30,
    EVER_90,
    EVER_180,
    DELINQUENCY_30,
    DELINQUENCY_90,
    DELINQUENCY_180,
    UPB_12,
    "zero_balance_effective_date",
    "foreclosed_after",
    "disposition_date",
    TIMESTAMP,
];

pub fn column_names(schema: &[ColumnSpec]) -> Vec<&'static str> {
    schema.iter().map(|spec| spec.name).collect()
}
