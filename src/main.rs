use std::sync::Arc;

use tracing::{error, info, warn};

use slotkeep::config::Config;
use slotkeep::directory::{BusinessDirectory, JsonFileDirectory};
use slotkeep::engine::{Engine, TemplateCache};
use slotkeep::model::now_ms;
use slotkeep::notify::NotifyHub;
use slotkeep::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    slotkeep::observability::init_tracing(config.log_json);
    slotkeep::observability::init_metrics(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let templates = Arc::new(TemplateCache::new(config.template_cache_size));
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(config.wal_path(), notify, templates)?);

    info!("slotkeep started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  template cache: {} entries", engine.templates().capacity());
    info!(
        "  sweep: every {:?}, up to {} rows",
        config.sweep_interval, config.sweep_limit
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let mut tasks = vec![
        tokio::spawn(sweeper::run_sweeper(
            engine.clone(),
            config.sweep_interval,
            config.sweep_limit,
        )),
        tokio::spawn(sweeper::run_compactor(
            engine.clone(),
            config.compact_threshold,
            std::time::Duration::from_secs(60),
        )),
    ];

    match &config.businesses_file {
        Some(path) => {
            info!(
                "  pre-generation: {} days from {}, every {:?}",
                config.pregenerate_days,
                path.display(),
                config.pregenerate_interval
            );
            let directory: Arc<dyn BusinessDirectory> = Arc::new(JsonFileDirectory::new(path));
            tasks.push(tokio::spawn(sweeper::run_pregenerator(
                engine.clone(),
                directory,
                config.pregenerate_days,
                config.pregenerate_interval,
            )));
        }
        None => info!("  pre-generation: disabled"),
    }

    shutdown_signal().await?;
    info!("shutdown signal received, stopping background tasks");
    for task in tasks {
        task.abort();
    }

    // Leave the log tidy for the next start.
    match engine.sweep_expired_batch(slotkeep::limits::MAX_SWEEP_LIMIT, now_ms()).await {
        Ok(n) if n > 0 => info!(reclaimed = n, "final sweep"),
        Ok(_) => {}
        Err(e) => warn!("final sweep failed: {e}"),
    }
    if let Err(e) = engine.compact_wal().await {
        error!("final compaction failed: {e}");
    }

    info!("slotkeep stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
