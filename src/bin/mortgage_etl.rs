use mortgage_etl::{
    etl_config_from_env, gather_by_worker, init_logging, load_seller_names, log_app_start,
    log_run_config, log_run_summary, logging_config_from_env, plan_partitions, process_partitions,
    select_partitions, split_labels, write_feature_table,
};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let cfg = etl_config_from_env();
    cfg.validate()?;

    let requests = plan_partitions(&cfg)?;
    log_run_config(&cfg, requests.len());
    if requests.is_empty() {
        return Err(format!(
            "no performance files for {}..={} under {}",
            cfg.start_year,
            cfg.end_year,
            cfg.performance_dir.display()
        )
        .into());
    }

    let ingest_cfg = cfg.ingest_config();
    let names = load_seller_names(&cfg.names_path, &ingest_cfg)?;
    let outcome = process_partitions(&requests, &names, &ingest_cfg, cfg.workers)?;

    let selected = select_partitions(&outcome.outputs, cfg.part_count);
    let gathered = gather_by_worker(selected)?;
    for (idx, table) in gathered.iter().enumerate() {
        let shard = split_labels(table)?;
        let paths = write_feature_table(&cfg.output_dir, &format!("part-{idx:04}"), table)?;
        info!(
            component = "mortgage_etl",
            event = "run.shard.ready",
            shard = idx,
            rows = shard.row_count(),
            features = shard.feature_names.len(),
            path = %paths.csv.display()
        );
    }

    log_run_summary(&outcome, gathered.len(), &cfg.output_dir);
    if outcome.outputs.is_empty() {
        return Err(format!("all {} partitions failed", outcome.failures.len()).into());
    }
    Ok(())
}
