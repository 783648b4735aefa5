use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::AppConfig;

use super::tasks::{prune_archive, warm_due_sources, WarmReport};

/// Events emitted after each background pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Sources due a refresh were refetched
    CacheWarmed {
        refreshed: u32,
        articles: usize,
        failed_sources: Vec<String>,
    },
    /// Old articles were removed from the archive
    ArchivePruned { deleted: u64 },
    /// An error occurred during a background task
    Error { task: String, message: String },
}

/// Periodic cache warmer, so requests rarely wait on upstream fetches
pub struct SchedulerService {
    aggregator: Aggregator,
    config: Arc<AppConfig>,
    event_tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
    last_warmed: HashMap<String, Instant>,
}

impl SchedulerService {
    pub fn new(aggregator: Aggregator, config: Arc<AppConfig>) -> Self {
        Self {
            aggregator,
            config,
            event_tx: None,
            last_warmed: HashMap::new(),
        }
    }

    /// Set the event sender for progress notifications
    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send_event(&self, event: SchedulerEvent) {
        if let Some(ref tx) = self.event_tx {
            if tx.send(event).is_err() {
                warn!("Failed to send scheduler event: receiver dropped");
            }
        }
    }

    /// Check for due sources every `refresh_interval_secs` until shutdown.
    /// The first pass runs immediately and warms every source.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let refresh_secs = self.config.sync.refresh_interval_secs;

        if refresh_secs == 0 {
            info!("Background refresh disabled (refresh_interval_secs = 0)");
            let _ = shutdown.changed().await;
            return;
        }

        info!("Scheduler started: checking sources every {}s", refresh_secs);
        let mut refresh_interval = tokio::time::interval(Duration::from_secs(refresh_secs));
        refresh_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Scheduler received shutdown signal");
                        break;
                    }
                }

                _ = refresh_interval.tick() => {
                    debug!("Running scheduled cache warm-up");
                    self.refresh_now().await;
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Run one warm-up and archive prune pass immediately
    pub async fn refresh_now(&mut self) -> WarmReport {
        let report =
            warm_due_sources(&self.aggregator, &mut self.last_warmed, Instant::now()).await;
        if report.refreshed > 0 {
            self.send_event(SchedulerEvent::CacheWarmed {
                refreshed: report.refreshed,
                articles: report.articles,
                failed_sources: report.failed_sources.clone(),
            });
        }

        match prune_archive(&self.aggregator, &self.config).await {
            Ok(0) => {}
            Ok(deleted) => self.send_event(SchedulerEvent::ArchivePruned { deleted }),
            Err(e) => {
                error!("Archive prune failed: {}", e);
                self.send_event(SchedulerEvent::Error {
                    task: "prune".to_string(),
                    message: e.to_string(),
                });
            }
        }

        report
    }
}
