use crate::anomaly::AnomalyDetector;
use crate::metrics::MetricsCollector;
use crate::storage::MemoryStore;
use crate::Config;
use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args)]
pub struct DetectArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "fe-waf.toml")]
    pub config: PathBuf,

    /// Restrict the run to one domain id
    #[arg(short, long)]
    pub domain: Option<u64>,

    /// Audit log file to analyze (defaults to storage.log_file)
    #[arg(short, long)]
    pub log_file: Option<PathBuf>,
}

pub async fn run(args: DetectArgs) -> Result<()> {
    let config = Config::from_file(&args.config)?;
    crate::logging::init_logging(&config.logging.level, &config.logging.format)?;

    let log_file = match args.log_file.or(config.storage.log_file) {
        Some(path) => path,
        None => bail!(
            "No audit log to analyze: pass --log-file or set storage.log_file in the config"
        ),
    };

    let store = Arc::new(MemoryStore::new());
    let loaded = store
        .load_request_logs(&log_file)
        .await
        .with_context(|| format!("Failed to load audit log from {}", log_file.display()))?;
    println!("Loaded {} log entry(ies) from {}", loaded, log_file.display());

    let detector = AnomalyDetector::new(
        Arc::clone(&store),
        Arc::new(MetricsCollector::new()),
        config.anomaly,
    );
    let report = detector.run(args.domain).await?;

    println!(
        "Scanned {} entry(ies) in the window: {} anomaly(ies), {} deduplicated",
        report.logs_scanned,
        report.created.len(),
        report.deduplicated
    );
    println!();

    if report.created.is_empty() {
        println!("No anomalies detected.");
        return Ok(());
    }

    println!(
        "{:<16} {:>6}  {:<10} {:<18} DETAILS",
        "TYPE", "SCORE", "DOMAIN", "SOURCE"
    );
    for anomaly in &report.created {
        println!(
            "{:<16} {:>6.1}  {:<10} {:<18} {}",
            anomaly.anomaly_type.to_string(),
            anomaly.score,
            anomaly
                .domain_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            anomaly.source.as_deref().unwrap_or("-"),
            anomaly.details
        );
    }

    Ok(())
}
