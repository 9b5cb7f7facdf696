use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use poolhall::config::ServerConfig;
use poolhall::engine::Engine;
use poolhall::jobs;
use poolhall::notify::Broadcaster;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();
    poolhall::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(Broadcaster::new());
    let engine = Arc::new(Engine::new(config.wal_path(), config.schedule, notify.clone())?);

    if engine.state.is_empty() {
        for number in 1..=config.seed_tables {
            engine.create_table(number, None).await?;
        }
        info!("seeded {} tables", config.seed_tables);
    }

    let activator = tokio::spawn(jobs::run_activator(
        engine.clone(),
        Duration::from_secs(config.tick_secs),
    ));
    let compactor = tokio::spawn(jobs::run_compactor(engine.clone(), config.compact_threshold));

    // Stand-in for the push channel: log every envelope.
    let mut feed = notify.subscribe();
    let feed_id = feed.id;
    let logger = tokio::spawn(async move {
        while let Some(note) = feed.rx.recv().await {
            info!(target: "poolhall::events", "{}", note.to_json());
        }
    });

    info!("poolhall ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  tables: {}", engine.state.len());
    info!("  tick: {}s, compact after {} appends", config.tick_secs, config.compact_threshold);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    shutdown_signal().await?;
    info!("shutdown signal received");

    activator.abort();
    compactor.abort();
    notify.unsubscribe(&feed_id);
    let _ = logger.await;

    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("poolhall stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
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
