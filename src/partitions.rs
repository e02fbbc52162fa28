//! Quarter planning and discovery of the per-quarter input files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::EtlConfig;
use crate::pipeline::PartitionRequest;

/// Every (year, quarter) from `start_year` Q1 through `end_year` Q4.
pub fn plan_quarters(start_year: i32, end_year: i32) -> Vec<(i32, u32)> {
    (start_year..=end_year)
        .flat_map(|year| (1..=4).map(move |quarter| (year, quarter)))
        .collect()
}

pub fn acquisition_path(dir: &Path, year: i32, quarter: u32) -> PathBuf {
    dir.join(format!("Acquisition_{year}Q{quarter}.txt"))
}

/// Files in `dir` whose name starts with `Performance_<year>Q<quarter>`,
/// sorted by name. A missing directory yields no files.
pub fn discover_performance_files(
    dir: &Path,
    year: i32,
    quarter: u32,
) -> io::Result<Vec<PathBuf>> {
    let prefix = format!("Performance_{year}Q{quarter}");
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// One request per discovered performance file, in quarter order.
pub fn plan_partitions(cfg: &EtlConfig) -> io::Result<Vec<PartitionRequest>> {
    let mut requests = Vec::new();
    for (year, quarter) in plan_quarters(cfg.start_year, cfg.end_year) {
        let files = discover_performance_files(&cfg.performance_dir, year, quarter)?;
        if files.is_empty() {
            warn!(
                component = "partitions",
                event = "partitions.quarter.empty",
                year,
                quarter
            );
            continue;
        }
        let acquisition = acquisition_path(&cfg.acquisition_dir, year, quarter);
        requests.extend(files.into_iter().map(|performance_path| PartitionRequest {
            year,
            quarter,
            performance_path,
            acquisition_path: acquisition.clone(),
        }));
    }

    info!(
        component = "partitions",
        event = "partitions.planned",
        start_year = cfg.start_year,
        end_year = cfg.end_year,
        partitions = requests.len()
    );
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn quarters_cover_inclusive_range_in_order() {
        let quarters = plan_quarters(2000, 2001);
        assert_eq!(quarters.len(), 8);
        assert_eq!(quarters[0], (2000, 1));
        assert_eq!(quarters[4], (2001, 1));
        assert_eq!(quarters[7], (2001, 4));
        assert!(plan_quarters(2002, 2001).is_empty());
    }

    #[test]
    fn discovery_matches_prefix_and_sorts() {
        let dir = tempdir().unwrap();
        for name in [
            "Performance_2000Q1.txt_1",
            "Performance_2000Q1.txt_0",
            "Performance_2000Q2.txt",
            "Acquisition_2000Q1.txt",
        ] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("Performance_2000Q1_dir")).unwrap();

        let files = discover_performance_files(dir.path(), 2000, 1).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["Performance_2000Q1.txt_0", "Performance_2000Q1.txt_1"]);

        assert!(discover_performance_files(&dir.path().join("nope"), 2000, 1)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn plan_pairs_each_split_with_its_quarter_acquisition() {
        let root = tempdir().unwrap();
        let cfg = EtlConfig {
            start_year: 2001,
            end_year: 2001,
            ..EtlConfig::with_data_root(root.path().to_path_buf())
        };
        fs::create_dir_all(&cfg.performance_dir).unwrap();
        fs::write(cfg.performance_dir.join("Performance_2001Q3.txt"), "").unwrap();
        fs::write(cfg.performance_dir.join("Performance_2001Q1.txt"), "").unwrap();

        let requests = plan_partitions(&cfg).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].quarter, 1);
        assert_eq!(requests[1].quarter, 3);
        assert_eq!(
            requests[1].acquisition_path,
            cfg.acquisition_dir.join("Acquisition_2001Q3.txt")
        );
        assert_eq!(requests[1].quarter_label(), "2001Q3");
    }
}
