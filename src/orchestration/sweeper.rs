//! # Background Sweeps
//!
//! Two independent loops:
//!
//! - the short sweep moves due retries back to `active`, delivers pending
//!   notifications and replays persistence writes parked during an outage;
//! - the long sweep recomputes metrics and purges terminal records past
//!   their retention window.
//!
//! [`RecoverySweeper::stop`] signals both loops and waits for the sweep in
//! flight to finish.

use crate::orchestration::error_store::ErrorRecordStore;
use crate::orchestration::metrics_aggregator::MetricsAggregator;
use crate::orchestration::notification_queue::{DeliveryReport, NotificationQueue};
use crate::orchestration::retry_scheduler::RetryScheduler;
use crate::storage::{namespaces, PersistenceWriter};
use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortSweepReport {
    pub ready_retries: Vec<Uuid>,
    pub notifications: DeliveryReport,
    pub flushed_writes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LongSweepReport {
    pub total_errors: usize,
    pub purged_records: usize,
}

/// Everything the sweeps touch
#[derive(Debug, Clone)]
pub struct SweepTargets {
    pub store: Arc<ErrorRecordStore>,
    pub scheduler: Arc<RetryScheduler>,
    pub notifications: Arc<NotificationQueue>,
    pub aggregator: Arc<MetricsAggregator>,
    pub writer: Arc<PersistenceWriter>,
    pub retention: Duration,
}

impl SweepTargets {
    pub async fn run_short_sweep(&self) -> ShortSweepReport {
        let ready_retries = self.scheduler.process_due(Utc::now()).await;
        let notifications = self.notifications.deliver_pending().await;

        let flushed_writes = if self.writer.pending_count() > 0 {
            self.writer.flush_pending().await
        } else {
            0
        };

        ShortSweepReport {
            ready_retries,
            notifications,
            flushed_writes,
        }
    }

    pub async fn run_long_sweep(&self) -> LongSweepReport {
        let metrics = self.aggregator.calculate_metrics();

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::days(30));
        let purged = self.store.purge_terminal_before(cutoff);
        let keys: Vec<String> = purged.iter().map(Uuid::to_string).collect();
        join_all(
            keys.iter()
                .map(|key| self.writer.delete(namespaces::ERROR_RECORDS, key)),
        )
        .await;
        if !purged.is_empty() {
            self.notifications.forget_errors(&purged);
            info!(purged = purged.len(), "🧹 Purged expired error records");
        }

        LongSweepReport {
            total_errors: metrics.total_errors,
            purged_records: purged.len(),
        }
    }
}

#[derive(Debug)]
pub struct RecoverySweeper {
    targets: SweepTargets,
    retry_interval: Duration,
    metrics_interval: Duration,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl RecoverySweeper {
    pub fn new(targets: SweepTargets, retry_interval: Duration, metrics_interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            targets,
            retry_interval,
            metrics_interval,
            shutdown,
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn targets(&self) -> &SweepTargets {
        &self.targets
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn both loops. Returns false when they are already running.
    pub async fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Sweeper already running");
            return false;
        }
        self.shutdown.send_replace(false);

        info!(
            retry_interval_ms = self.retry_interval.as_millis() as u64,
            metrics_interval_ms = self.metrics_interval.as_millis() as u64,
            "🔄 Starting recovery sweeps"
        );

        let short = {
            let targets = self.targets.clone();
            let mut shutdown = self.shutdown.subscribe();
            let period = self.retry_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let report = targets.run_short_sweep().await;
                            if !report.ready_retries.is_empty() || report.flushed_writes > 0 {
                                debug!(
                                    ready = report.ready_retries.len(),
                                    sent = report.notifications.sent,
                                    flushed = report.flushed_writes,
                                    "Short sweep finished"
                                );
                            }
                        }
                        _ = shutdown.changed() => {
                            info!("Short sweep loop shutting down");
                            break;
                        }
                    }
                }
            })
        };

        let long = {
            let targets = self.targets.clone();
            let mut shutdown = self.shutdown.subscribe();
            let period = self.metrics_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            targets.run_long_sweep().await;
                        }
                        _ = shutdown.changed() => {
                            info!("Metrics sweep loop shutting down");
                            break;
                        }
                    }
                }
            })
        };

        self.handles.lock().await.extend([short, long]);
        true
    }

    /// Signal both loops and wait up to `timeout` for them to drain
    pub async fn stop(&self, timeout: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("🛑 Stopping recovery sweeps");
        self.shutdown.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Sweep task ended abnormally"),
                Err(_) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Sweep task did not stop in time, aborting");
                    abort.abort();
                }
            }
        }
        info!("✅ Recovery sweeps stopped");
    }
}
