use std::fs;
use std::path::Path;

use mortgage_etl::{
    gather_by_worker, load_seller_names, plan_partitions, process_partitions, read_schema_sidecar,
    select_partitions, split_labels, write_feature_table, EtlConfig, FeatureTable, IngestConfig,
    LABEL_COLUMN,
};
use tempfile::tempdir;

fn perf_line(loan_id: i64, period: &str, status: &str) -> String {
    serviced_line(loan_id, period, status, "OTHER")
}

fn serviced_line(loan_id: i64, period: &str, status: &str, servicer: &str) -> String {
    let mut fields = vec![
        loan_id.to_string(),
        period.to_string(),
        servicer.to_string(),
        "7.0".to_string(),
        "120000".to_string(),
    ];
    fields.resize(10, String::new());
    fields.push(status.to_string());
    fields.resize(31, String::new());
    fields.join("|")
}

fn acq_line(loan_id: i64) -> String {
    let mut fields = vec![loan_id.to_string(), "C".to_string(), "A".to_string()];
    fields.resize(25, String::new());
    fields.join("|")
}

fn write(path: &Path, lines: &[String]) {
    let body: String = std::iter::once("header".to_string())
        .chain(lines.iter().cloned())
        .map(|line| line + "\n")
        .collect();
    fs::write(path, body).unwrap();
}

fn base_config(root: &Path, workers: usize) -> EtlConfig {
    let cfg = EtlConfig {
        start_year: 2000,
        end_year: 2000,
        workers,
        max_retries: 0,
        retry_backoff_ms: 1,
        ..EtlConfig::with_data_root(root.to_path_buf())
    };
    fs::create_dir_all(&cfg.performance_dir).unwrap();
    fs::create_dir_all(&cfg.acquisition_dir).unwrap();
    write(&cfg.names_path, &["A|Alpha".to_string()]);
    cfg
}

fn run_and_gather(cfg: &EtlConfig) -> Vec<FeatureTable> {
    let ingest = cfg.ingest_config();
    let requests = plan_partitions(cfg).unwrap();
    let names = load_seller_names(&cfg.names_path, &ingest).unwrap();
    let outcome = process_partitions(&requests, &names, &ingest, cfg.workers).unwrap();
    assert!(outcome.failures.is_empty());
    gather_by_worker(&outcome.outputs).unwrap()
}

fn seed(root: &Path) -> EtlConfig {
    let cfg = base_config(root, 2);

    // Q1: two healthy splits.
    write(
        &cfg.performance_dir.join("Performance_2000Q1.txt_0"),
        &[
            perf_line(1, "01/01/2000", "0"),
            perf_line(1, "02/01/2000", "4"),
        ],
    );
    write(
        &cfg.performance_dir.join("Performance_2000Q1.txt_1"),
        &[perf_line(2, "01/01/2000", "0")],
    );
    write(
        &cfg.acquisition_dir.join("Acquisition_2000Q1.txt"),
        &[acq_line(1), acq_line(2)],
    );

    // Q2: malformed performance split.
    write(
        &cfg.performance_dir.join("Performance_2000Q2.txt"),
        &["3|04/01/2000|only three".to_string()],
    );
    write(
        &cfg.acquisition_dir.join("Acquisition_2000Q2.txt"),
        &[acq_line(3)],
    );

    // Q3: acquisition file missing.
    write(
        &cfg.performance_dir.join("Performance_2000Q3.txt"),
        &[perf_line(4, "07/01/2000", "0")],
    );
    cfg
}

#[test]
fn failing_partitions_are_isolated() {
    let dir = tempdir().unwrap();
    let cfg = seed(dir.path());
    let ingest = cfg.ingest_config();

    let requests = plan_partitions(&cfg).unwrap();
    assert_eq!(requests.len(), 4);

    let names = load_seller_names(&cfg.names_path, &ingest).unwrap();
    let outcome = process_partitions(&requests, &names, &ingest, cfg.workers).unwrap();

    assert_eq!(outcome.outputs.len(), 2);
    assert_eq!(outcome.failures.len(), 2);
    assert!(outcome.outputs.iter().all(|o| o.request.quarter == 1));
    assert!(outcome.outputs.iter().all(|o| o.worker < cfg.workers));

    let q2 = outcome.failures.iter().find(|f| f.request.quarter == 2).unwrap();
    assert!(q2.error.contains("columns"), "unexpected error: {}", q2.error);
    let q3 = outcome.failures.iter().find(|f| f.request.quarter == 3).unwrap();
    assert!(q3.error.contains("I/O"), "unexpected error: {}", q3.error);
}

#[test]
fn gathered_tables_split_and_export() {
    let dir = tempdir().unwrap();
    let cfg = seed(dir.path());
    let ingest = cfg.ingest_config();
    let requests = plan_partitions(&cfg).unwrap();
    let names = load_seller_names(&cfg.names_path, &ingest).unwrap();
    let outcome = process_partitions(&requests, &names, &ingest, cfg.workers).unwrap();

    let gathered = gather_by_worker(&outcome.outputs).unwrap();
    let rows: usize = gathered.iter().map(|t| t.row_count).sum();
    assert_eq!(rows, 3);
    assert_eq!(gathered.len(), 2);

    let mut labels = Vec::new();
    for (idx, table) in gathered.iter().enumerate() {
        let shard = split_labels(table).unwrap();
        assert_eq!(shard.feature_names.len(), table.schema.columns.len() - 1);
        assert!(!shard.feature_names.iter().any(|n| n == LABEL_COLUMN));
        labels.extend(shard.labels);

        let paths = write_feature_table(&cfg.output_dir, &format!("part-{idx:04}"), table).unwrap();
        let csv = fs::read_to_string(&paths.csv).unwrap();
        assert_eq!(csv.lines().count(), table.row_count + 1);
        let sidecar = read_schema_sidecar(&paths.schema).unwrap();
        assert_eq!(sidecar.schema.fingerprint, table.schema.fingerprint);
    }

    labels.sort_by(f32::total_cmp);
    assert_eq!(labels, vec![0.0, 1.0, 1.0]);
}

#[test]
fn single_worker_runs_every_partition_in_order() {
    let dir = tempdir().unwrap();
    let cfg = seed(dir.path());
    let ingest = IngestConfig {
        max_retries: 0,
        ..cfg.ingest_config()
    };
    let requests = plan_partitions(&cfg).unwrap();
    let names = load_seller_names(&cfg.names_path, &ingest).unwrap();
    let outcome = process_partitions(&requests[..2], &names, &ingest, 1).unwrap();

    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.outputs[0].request, requests[0]);
    assert_eq!(outcome.outputs[1].request, requests[1]);
    assert!(outcome.outputs.iter().all(|o| o.worker == 0));

    let gathered = gather_by_worker(&outcome.outputs).unwrap();
    assert_eq!(gathered.len(), 1);
    assert_eq!(gathered[0].row_count, 3);
}

#[test]
fn gathered_servicer_codes_share_one_dictionary() {
    let dir = tempdir().unwrap();
    let cfg = base_config(dir.path(), 1);
    write(
        &cfg.performance_dir.join("Performance_2000Q1.txt_0"),
        &[
            serviced_line(1, "01/01/2000", "0", "BBB"),
            serviced_line(2, "01/01/2000", "0", "AAA"),
        ],
    );
    write(
        &cfg.performance_dir.join("Performance_2000Q1.txt_1"),
        &[serviced_line(3, "01/01/2000", "0", "BBB")],
    );
    write(
        &cfg.acquisition_dir.join("Acquisition_2000Q1.txt"),
        &[acq_line(1), acq_line(2), acq_line(3)],
    );

    let gathered = run_and_gather(&cfg);
    assert_eq!(gathered.len(), 1);
    let table = &gathered[0];
    assert_eq!(table.column("servicer").unwrap(), &[1.0, 0.0, 1.0]);

    let servicers: Vec<_> = table
        .categories
        .iter()
        .filter(|d| d.column == "servicer")
        .collect();
    assert_eq!(servicers.len(), 1);
    assert_eq!(servicers[0].labels, vec!["AAA", "BBB"]);
}

#[test]
fn repeated_runs_gather_identical_tables() {
    let dir = tempdir().unwrap();
    let cfg = base_config(dir.path(), 3);
    let mut acquisitions = Vec::new();
    for split in 0..5i64 {
        let loan = 10 + split;
        write(
            &cfg.performance_dir.join(format!("Performance_2000Q1.txt_{split}")),
            &[
                perf_line(loan, "01/01/2000", "0"),
                perf_line(loan, "02/01/2000", &split.to_string()),
            ],
        );
        acquisitions.push(acq_line(loan));
    }
    write(
        &cfg.acquisition_dir.join("Acquisition_2000Q1.txt"),
        &acquisitions,
    );

    let ingest = cfg.ingest_config();
    let requests = plan_partitions(&cfg).unwrap();
    let names = load_seller_names(&cfg.names_path, &ingest).unwrap();
    let outcome = process_partitions(&requests, &names, &ingest, cfg.workers).unwrap();
    for (idx, output) in outcome.outputs.iter().enumerate() {
        assert_eq!(output.request, requests[idx]);
        assert_eq!(output.worker, idx % cfg.workers);
    }

    let first = run_and_gather(&cfg);
    let second = run_and_gather(&cfg);
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
    assert_eq!(first[0].row_count, 4);
}

#[test]
fn part_count_keeps_leading_outputs_before_gather() {
    let dir = tempdir().unwrap();
    let cfg = seed(dir.path());
    let ingest = cfg.ingest_config();
    let requests = plan_partitions(&cfg).unwrap();
    let names = load_seller_names(&cfg.names_path, &ingest).unwrap();
    let outcome = process_partitions(&requests, &names, &ingest, cfg.workers).unwrap();
    assert_eq!(outcome.outputs.len(), 2);

    let selected = select_partitions(&outcome.outputs, 1);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].request, requests[0]);

    let gathered = gather_by_worker(selected).unwrap();
    assert_eq!(gathered.len(), 1);
    assert_eq!(gathered[0].row_count, 2);

    let everything = select_partitions(&outcome.outputs, 16);
    assert_eq!(everything.len(), 2);
}
