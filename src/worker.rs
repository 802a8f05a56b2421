//! Periodic driver for a [`SyncOrchestrator`].

use crate::directory::Directory;
use crate::orchestrator::SyncOrchestrator;
use crate::storage::{EventQueue, ServerRegistry, SyncRequestStore};
use crate::transport::Transport;
use log::{error, info};
use std::future::Future;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};

const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Ticks incremental updates and sync request processing on two intervals.
///
/// Ticks missed while a cycle is running are skipped, so cycles never overlap.
pub struct SyncWorker<S, D, T> {
    orchestrator: SyncOrchestrator<S, D, T>,
}

impl<S, D, T> SyncWorker<S, D, T>
where
    S: EventQueue + ServerRegistry + SyncRequestStore,
    D: Directory,
    T: Transport,
{
    pub fn new(orchestrator: SyncOrchestrator<S, D, T>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator<S, D, T> {
        &self.orchestrator
    }

    /// Run until `shutdown` resolves.
    ///
    /// Both intervals fire immediately on start. A cycle interrupted by
    /// shutdown deletes nothing it had not already confirmed.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let config = self.orchestrator.config();
        let mut updates = interval(config.update_interval.max(MIN_PERIOD));
        updates.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut requests = interval(config.request_interval.max(MIN_PERIOD));
        requests.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        info!(
            "Sync worker started (updates every {:?}, requests every {:?})",
            config.update_interval, config.request_interval
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = requests.tick() => {
                    match self.orchestrator.process_sync_requests_until(&mut shutdown).await {
                        Ok(Some(report)) => info!(
                            "Sync requests: {} completed, {} retained, {} dropped",
                            report.completed, report.retained, report.dropped
                        ),
                        Ok(None) => break,
                        Err(e) => error!("Sync request processing failed: {}", e),
                    }
                }
                _ = updates.tick() => {
                    match self.orchestrator.run_incremental_update_until(&mut shutdown).await {
                        Ok(Some(_)) => {}
                        Ok(None) => break,
                        Err(e) => error!("Incremental update failed: {}", e),
                    }
                }
            }
        }

        info!("Sync worker stopped");
    }
}
