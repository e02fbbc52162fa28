//! CSV and JSON-schema export of feature tables.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::assembly::{FeatureSchema, FeatureTable};
use crate::category::CategoryDictionary;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid export name '{0}'")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub csv: PathBuf,
    pub schema: PathBuf,
}

/// Sidecar written next to the CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSidecar {
    pub schema: FeatureSchema,
    pub row_count: usize,
    pub categories: Vec<CategoryDictionary>,
}

/// Writes `<dir>/<name>.csv` and `<dir>/<name>.schema.json`. Both files are
/// written to a temporary name first and renamed into place.
pub fn write_feature_table(
    dir: &Path,
    name: &str,
    table: &FeatureTable,
) -> Result<ExportPaths, ExportError> {
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(ExportError::InvalidName(name.to_string()));
    }
    fs::create_dir_all(dir)?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.schema.columns.iter().map(|c| c.name.as_str()))?;
    for idx in 0..table.row_count {
        writer.write_record(table.columns.iter().map(|c| c[idx].to_string()))?;
    }
    let csv_bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Io(err.into_error()))?;

    let sidecar = SchemaSidecar {
        schema: table.schema.clone(),
        row_count: table.row_count,
        categories: table.categories.clone(),
    };
    let schema_bytes = serde_json::to_vec_pretty(&sidecar)?;

    let paths = ExportPaths {
        csv: dir.join(format!("{name}.csv")),
        schema: dir.join(format!("{name}.schema.json")),
    };
    write_atomic(&paths.csv, &csv_bytes)?;
    write_atomic(&paths.schema, &schema_bytes)?;

    info!(
        component = "export",
        event = "export.table.written",
        path = %paths.csv.display(),
        rows = table.row_count,
        fingerprint = %table.schema.fingerprint
    );
    Ok(paths)
}

pub fn read_schema_sidecar(path: &Path) -> Result<SchemaSidecar, ExportError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| ExportError::InvalidName(path.display().to_string()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::LABEL_COLUMN;
    use tempfile::tempdir;

    fn sample() -> FeatureTable {
        FeatureTable {
            schema: FeatureSchema::new(&[LABEL_COLUMN, "orig_ltv"]),
            categories: vec![CategoryDictionary::from_labels("servicer", ["b", "a"])],
            columns: vec![vec![1.0, 0.0], vec![80.5, -1.0]],
            row_count: 2,
        }
    }

    #[test]
    fn writes_csv_and_schema_sidecar() {
        let dir = tempdir().unwrap();
        let table = sample();
        let paths = write_feature_table(&dir.path().join("out"), "part-0", &table).unwrap();

        let csv = fs::read_to_string(&paths.csv).unwrap();
        assert_eq!(csv, "delinquency_12,orig_ltv\n1,80.5\n0,-1\n");

        let sidecar = read_schema_sidecar(&paths.schema).unwrap();
        assert_eq!(sidecar.schema, table.schema);
        assert_eq!(sidecar.row_count, 2);
        assert_eq!(sidecar.categories[0].labels, vec!["a", "b"]);
        assert!(!paths.csv.with_file_name("part-0.csv.tmp").exists());
    }

    #[test]
    fn rejects_names_with_separators() {
        let dir = tempdir().unwrap();
        let err = write_feature_table(dir.path(), "../x", &sample()).unwrap_err();
        assert!(matches!(err, ExportError::InvalidName(_)));
    }
}
