//! Explicit code <-> label dictionaries for categorical columns.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CATEGORY_DICTIONARY_VERSION: u32 = 1;

/// Code <-> label mapping for one categorical column.
///
/// Labels are sorted, so codes are assigned deterministically from the set of
/// labels regardless of row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDictionary {
    pub column: String,
    pub version: u32,
    pub labels: Vec<String>,
    pub fingerprint: String,
}

impl CategoryDictionary {
    pub fn from_labels<'a>(column: &str, labels: impl IntoIterator<Item = &'a str>) -> Self {
        let sorted: BTreeSet<&str> = labels.into_iter().collect();
        let labels: Vec<String> = sorted.into_iter().map(str::to_string).collect();
        let fingerprint = dictionary_fingerprint(column, &labels);
        Self {
            column: column.to_string(),
            version: CATEGORY_DICTIONARY_VERSION,
            labels,
            fingerprint,
        }
    }

    pub fn code(&self, label: &str) -> Option<u32> {
        self.labels
            .binary_search_by(|candidate| candidate.as_str().cmp(label))
            .ok()
            .and_then(|idx| u32::try_from(idx).ok())
    }

    pub fn label(&self, code: u32) -> Option<&str> {
        self.labels.get(code as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// One dictionary per column holding the sorted union of every label seen in
/// `dictionaries`, ordered by column name.
pub fn merge_dictionaries<'a>(
    dictionaries: impl IntoIterator<Item = &'a CategoryDictionary>,
) -> Vec<CategoryDictionary> {
    let mut labels: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for dictionary in dictionaries {
        labels
            .entry(dictionary.column.as_str())
            .or_default()
            .extend(dictionary.labels.iter().map(String::as_str));
    }
    labels
        .into_iter()
        .map(|(column, labels)| CategoryDictionary::from_labels(column, labels))
        .collect()
}

fn dictionary_fingerprint(column: &str, labels: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{CATEGORY_DICTIONARY_VERSION};column:{column};labels:"));
    for label in labels {
        hasher.update(label.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
