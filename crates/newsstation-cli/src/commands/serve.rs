use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use newsstation_core::{
    scheduler::{SchedulerEvent, SchedulerService},
    server::{self, AppState},
    AppConfig,
};

/// Run the HTTP API and the background cache warmer until Ctrl+C
pub async fn run(config: Arc<AppConfig>) -> Result<()> {
    let query = super::build_services(&config).await?;
    let state = AppState::new(&config, query.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = signal_tx.send(true);
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SchedulerEvent::CacheWarmed {
                    articles,
                    failed_sources,
                    ..
                } if !failed_sources.is_empty() => {
                    warn!(
                        "Cache warmed with {} articles; failing sources: {}",
                        articles,
                        failed_sources.join(", ")
                    );
                }
                SchedulerEvent::Error { task, message } => {
                    warn!("Background task {} failed: {}", task, message);
                }
                _ => {}
            }
        }
    });

    let scheduler = SchedulerService::new(query.aggregator().clone(), config.clone())
        .with_event_sender(event_tx);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    println!("NewsStation listening on http://{}", config.bind_address());
    println!("  Cache expiration: {} seconds", config.cache.expiration_secs);
    println!("  Source check interval: {} seconds", config.sync.refresh_interval_secs);
    println!(
        "  Archive: {}",
        if config.general.archive_enabled {
            config.database_path().display().to_string()
        } else {
            "disabled".to_string()
        }
    );

    let result = server::serve(&config, state, shutdown_rx).await;

    // The server can also stop on a bind error; make sure the warmer follows
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;

    result?;
    println!("NewsStation stopped.");
    Ok(())
}
