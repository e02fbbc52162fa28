//! Performance/acquisition join and the final numeric feature table.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::category::CategoryDictionary;
use crate::delinquency::ensure_row_count;
use crate::monthly::LoanMonthFeatures;
use crate::pipeline::PipelineError;
use crate::schema::{
    DELINQUENCY_12, DELINQUENCY_180, DELINQUENCY_30, DELINQUENCY_90, EVER_180, EVER_30, EVER_90,
    FINAL_DROP_COLUMNS, LOAN_ID, MONTHLY_REPORTING_PERIOD, TIMESTAMP, TIMESTAMP_MONTH,
    TIMESTAMP_YEAR, UPB_12,
};
use crate::sentinel::{date_to_epoch_days, MISSING_VALUE};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;
pub const LABEL_COLUMN: &str = DELINQUENCY_12;

const ROW_ORDER: &str = "__row_order";
const KEY_ROWS: &str = "__key_rows";
const MONTH_KEYS: [&str; 3] = [LOAN_ID, TIMESTAMP_YEAR, TIMESTAMP_MONTH];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub label_column: String,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn new(column_names: &[&str]) -> Self {
        let columns: Vec<FeatureColumn> = column_names
            .iter()
            .map(|name| FeatureColumn {
                name: (*name).to_string(),
                dtype: FeatureDType::F32,
            })
            .collect();
        let fingerprint = schema_fingerprint(FEATURE_SCHEMA_VERSION, &columns);
        Self {
            version: FEATURE_SCHEMA_VERSION,
            fingerprint,
            label_column: LABEL_COLUMN.to_string(),
            columns,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Terminal artifact of a partition: uniformly `f32`, null-free, columnar.
/// `categories` holds the dictionary behind every code-valued column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    pub categories: Vec<CategoryDictionary>,
    pub columns: Vec<Vec<f32>>,
    pub row_count: usize,
}

impl FeatureTable {
    pub fn column(&self, name: &str) -> Option<&[f32]> {
        self.schema
            .column_index(name)
            .map(|idx| self.columns[idx].as_slice())
    }

    pub fn row(&self, idx: usize) -> Option<Vec<f32>> {
        if idx >= self.row_count {
            return None;
        }
        Some(self.columns.iter().map(|c| c[idx]).collect())
    }

    /// Appends the rows of `other`. Both tables must share the schema
    /// fingerprint and the same dictionary for every categorical column.
    pub fn concat(mut self, other: &FeatureTable) -> Result<Self, PipelineError> {
        if self.schema.fingerprint != other.schema.fingerprint {
            return Err(PipelineError::SchemaMismatch {
                expected: self.schema.fingerprint.clone(),
                actual: other.schema.fingerprint.clone(),
            });
        }
        if let Some(column) = mismatched_dictionary(&self.categories, &other.categories) {
            return Err(PipelineError::CategoryMismatch { column });
        }
        for (dst, src) in self.columns.iter_mut().zip(&other.columns) {
            dst.extend_from_slice(src);
        }
        self.row_count += other.row_count;
        Ok(self)
    }

    /// Rewrites every categorical column onto the matching dictionary in
    /// `catalog`. Missing-value codes stay -1.
    pub fn recode(&self, catalog: &[CategoryDictionary]) -> Result<Self, PipelineError> {
        let mut recoded = self.clone();
        let mut categories = Vec::with_capacity(self.categories.len());
        for local in &self.categories {
            let target = catalog
                .iter()
                .find(|d| d.column == local.column)
                .ok_or_else(|| PipelineError::CategoryMismatch {
                    column: local.column.clone(),
                })?;
            categories.push(target.clone());

            let Some(idx) = self.schema.column_index(&local.column) else {
                continue;
            };
            for value in &mut recoded.columns[idx] {
                if *value < 0.0 {
                    continue;
                }
                let code = *value as u32;
                let label = local.label(code).ok_or_else(|| PipelineError::UnknownCategoryCode {
                    column: local.column.clone(),
                    code,
                })?;
                let code = target
                    .code(label)
                    .ok_or_else(|| PipelineError::CategoryMismatch {
                        column: local.column.clone(),
                    })?;
                *value = code as f32;
            }
        }
        categories.sort_by(|a, b| a.column.cmp(&b.column));
        recoded.categories = categories;
        Ok(recoded)
    }
}

/// Category columns become their integer code with null -> -1; numeric nulls
/// become -1; dates are left untouched. Returns the dictionary of every
/// encoded column.
pub fn null_workaround(
    frame: DataFrame,
) -> Result<(DataFrame, Vec<CategoryDictionary>), PipelineError> {
    let mut dictionaries = Vec::new();
    let mut columns = Vec::with_capacity(frame.width());
    for column in frame.get_columns() {
        if column.dtype() == &DataType::String {
            let (codes, dictionary) = encode_category(column)?;
            dictionaries.push(dictionary);
            columns.push(codes);
        } else {
            columns.push(column.clone());
        }
    }

    let fills: Vec<Expr> = columns
        .iter()
        .filter_map(|column| {
            let name = column.name().clone();
            let dtype = column.dtype();
            if dtype.is_float() {
                Some(col(name).fill_null(lit(MISSING_VALUE as f64)))
            } else if dtype.is_integer() {
                Some(col(name).fill_null(lit(MISSING_VALUE)))
            } else {
                None
            }
        })
        .collect();

    let filled = DataFrame::new(columns)?.lazy().with_columns(fills).collect()?;
    Ok((filled, dictionaries))
}

fn encode_category(column: &Column) -> PolarsResult<(Column, CategoryDictionary)> {
    let labels = column.as_materialized_series().str()?;
    let dictionary =
        CategoryDictionary::from_labels(column.name().as_str(), labels.into_iter().flatten());
    let codes: Vec<i64> = labels
        .into_iter()
        .map(|label| {
            label
                .and_then(|l| dictionary.code(l))
                .map_or(MISSING_VALUE, i64::from)
        })
        .collect();
    Ok((Column::new(column.name().clone(), codes), dictionary))
}

/// Columnar form of the rebucketed loan-month table. Onset dates are epoch
/// milliseconds with -1 for never observed.
pub fn loan_month_frame(rows: &[LoanMonthFeatures]) -> Result<DataFrame, PipelineError> {
    fn ints(rows: &[LoanMonthFeatures], f: impl Fn(&LoanMonthFeatures) -> i64) -> Vec<i64> {
        rows.iter().map(f).collect()
    }

    let timestamps: Vec<i32> = rows
        .iter()
        .map(|r| date_to_epoch_days(r.timestamp))
        .collect();
    let delinquency_12: Vec<Option<i64>> = rows
        .iter()
        .map(|r| r.delinquency_12.map(i64::from))
        .collect();
    let upb_12: Vec<Option<f64>> = rows.iter().map(|r| r.upb_12).collect();

    let frame = DataFrame::new(vec![
        Column::new(LOAN_ID.into(), ints(rows, |r| r.loan_id)),
        Column::new(TIMESTAMP.into(), timestamps).cast(&DataType::Date)?,
        Column::new(
            TIMESTAMP_MONTH.into(),
            ints(rows, |r| i64::from(r.timestamp_month)),
        ),
        Column::new(
            TIMESTAMP_YEAR.into(),
            ints(rows, |r| i64::from(r.timestamp_year)),
        ),
        Column::new(EVER_30.into(), ints(rows, |r| i64::from(r.features.ever_30))),
        Column::new(EVER_90.into(), ints(rows, |r| i64::from(r.features.ever_90))),
        Column::new(EVER_180.into(), ints(rows, |r| i64::from(r.features.ever_180))),
        Column::new(
            DELINQUENCY_30.into(),
            ints(rows, |r| r.features.delinquency_30.as_epoch_millis()),
        ),
        Column::new(
            DELINQUENCY_90.into(),
            ints(rows, |r| r.features.delinquency_90.as_epoch_millis()),
        ),
        Column::new(
            DELINQUENCY_180.into(),
            ints(rows, |r| r.features.delinquency_180.as_epoch_millis()),
        ),
        Column::new(DELINQUENCY_12.into(), delinquency_12),
        Column::new(UPB_12.into(), upb_12),
    ])?;
    Ok(frame)
}

/// Joins the loan-month features onto the raw performance rows by
/// (loan, year, month), then the acquisition attributes by loan. Every input
/// goes through [`null_workaround`] first; the returned dictionaries cover the
/// performance and acquisition category columns. Performance row order is
/// kept.
pub fn join_performance_acquisition(
    performance: DataFrame,
    loan_months: DataFrame,
    acquisition: DataFrame,
) -> Result<(DataFrame, Vec<CategoryDictionary>), PipelineError> {
    let rows_before = performance.height();
    let (performance, mut categories) = null_workaround(performance)?;
    let (loan_months, _) = null_workaround(loan_months)?;
    let (acquisition, acquisition_categories) = null_workaround(acquisition)?;
    categories.extend(acquisition_categories);

    ensure_unique_keys("performance_month_join", &loan_months, &MONTH_KEYS)?;
    ensure_unique_keys("acquisition_join", &acquisition, &[LOAN_ID])?;

    let merged = performance
        .lazy()
        .with_row_index(ROW_ORDER, None)
        .with_columns([
            col(MONTHLY_REPORTING_PERIOD)
                .dt()
                .year()
                .cast(DataType::Int64)
                .alias(TIMESTAMP_YEAR),
            col(MONTHLY_REPORTING_PERIOD)
                .dt()
                .month()
                .cast(DataType::Int64)
                .alias(TIMESTAMP_MONTH),
        ])
        .join(
            loan_months.lazy(),
            key_exprs(&MONTH_KEYS),
            key_exprs(&MONTH_KEYS),
            JoinArgs::new(JoinType::Left),
        )
        .join(
            acquisition.lazy(),
            [col(LOAN_ID)],
            [col(LOAN_ID)],
            JoinArgs::new(JoinType::Left),
        )
        .sort([ROW_ORDER], SortMultipleOptions::default())
        .collect()?;
    let merged = drop_columns(merged, &[ROW_ORDER, TIMESTAMP_YEAR, TIMESTAMP_MONTH])?;
    ensure_row_count("performance_acquisition_join", rows_before, merged.height())?;

    Ok((merged, categories))
}

/// Drops identifier and leakage columns, casts every column to `f32`
/// (dates as epoch milliseconds), binarizes the label and fills the remaining
/// nulls with -1.
pub fn assemble_features(
    frame: DataFrame,
    categories: &[CategoryDictionary],
) -> Result<FeatureTable, PipelineError> {
    let frame = drop_columns(frame, &FINAL_DROP_COLUMNS)?;
    frame
        .column(LABEL_COLUMN)
        .map_err(|_| PipelineError::MissingLabel)?;

    let filled_nulls: usize = frame
        .get_columns()
        .iter()
        .filter(|c| c.name().as_str() != LABEL_COLUMN)
        .map(|c| c.null_count())
        .sum();
    let names: Vec<&str> = frame
        .get_columns()
        .iter()
        .map(|c| c.name().as_str())
        .collect();
    let schema = FeatureSchema::new(&names);
    let mut categories: Vec<CategoryDictionary> = categories
        .iter()
        .filter(|d| names.contains(&d.column.as_str()))
        .cloned()
        .collect();
    categories.sort_by(|a, b| a.column.cmp(&b.column));

    let exprs: Vec<Expr> = frame
        .get_columns()
        .iter()
        .map(|column| feature_expr(column.name().as_str(), column.dtype()))
        .collect();
    let numeric = frame.lazy().select(exprs).collect()?;

    let row_count = numeric.height();
    let columns = numeric
        .get_columns()
        .iter()
        .map(|column| {
            let values = column.as_materialized_series().f32()?;
            Ok(values
                .into_iter()
                .map(|v| v.unwrap_or(MISSING_VALUE as f32))
                .collect())
        })
        .collect::<PolarsResult<Vec<Vec<f32>>>>()?;

    info!(
        component = "assembly",
        event = "assembly.features.built",
        rows = row_count,
        columns = schema.columns.len(),
        filled_nulls,
        fingerprint = %schema.fingerprint
    );

    Ok(FeatureTable {
        schema,
        categories,
        columns,
        row_count,
    })
}

fn feature_expr(name: &str, dtype: &DataType) -> Expr {
    let value = if dtype == &DataType::Date {
        col(name)
            .cast(DataType::Datetime(TimeUnit::Milliseconds, None))
            .cast(DataType::Int64)
    } else {
        col(name)
    };
    if name == LABEL_COLUMN {
        when(value.gt(lit(0)))
            .then(lit(1.0f32))
            .otherwise(lit(0.0f32))
            .cast(DataType::Float32)
            .alias(name)
    } else {
        value
            .cast(DataType::Float64)
            .fill_null(lit(MISSING_VALUE as f64))
            .cast(DataType::Float32)
            .alias(name)
    }
}

fn key_exprs(keys: &[&str]) -> Vec<Expr> {
    keys.iter().map(|key| col(*key)).collect()
}

fn drop_columns(mut frame: DataFrame, names: &[&str]) -> Result<DataFrame, PipelineError> {
    for name in names {
        frame = frame.drop(name)?;
    }
    Ok(frame)
}

/// A key present more than once on the right side of a left join would fan
/// out the left rows; the smallest such key is reported.
fn ensure_unique_keys(
    stage: &'static str,
    frame: &DataFrame,
    keys: &[&str],
) -> Result<(), PipelineError> {
    let duplicates = frame
        .clone()
        .lazy()
        .group_by(key_exprs(keys))
        .agg([len().alias(KEY_ROWS)])
        .filter(col(KEY_ROWS).gt(lit(1)))
        .sort(keys.to_vec(), SortMultipleOptions::default())
        .limit(1)
        .collect()?;
    if duplicates.height() == 0 {
        return Ok(());
    }

    let key = keys
        .iter()
        .map(|name| Ok(duplicates.column(name)?.get(0)?.to_string()))
        .collect::<PolarsResult<Vec<String>>>()?
        .join("/");
    Err(PipelineError::JoinFanOut { stage, key })
}

/// First column whose dictionary differs between the two lists.
fn mismatched_dictionary(
    left: &[CategoryDictionary],
    right: &[CategoryDictionary],
) -> Option<String> {
    for dictionary in left {
        match right.iter().find(|d| d.column == dictionary.column) {
            Some(other) if other.fingerprint == dictionary.fingerprint => {}
            _ => return Some(dictionary.column.clone()),
        }
    }
    right
        .iter()
        .find(|d| !left.iter().any(|l| l.column == d.column))
        .map(|d| d.column.clone())
}

fn schema_fingerprint(version: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":f32;");
    }
    hex::encode(hasher.finalize())
}
