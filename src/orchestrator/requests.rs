use super::{FullSyncReport, SyncOrchestrator};
use crate::directory::Directory;
use crate::error::{SyncError, SyncResult};
use crate::storage::{EventQueue, ServerRegistry, SyncRequestStore};
use crate::transport::Transport;
use log::{info, warn};
use std::future::Future;

/// Outcome of one pass over the standing sync requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestsReport {
    pub syncs: Vec<FullSyncReport>,
    /// Requests deleted after a fully successful resync.
    pub completed: usize,
    /// Requests kept for the next pass.
    pub retained: usize,
    /// Requests deleted because their server is no longer registered.
    pub dropped: usize,
}

impl RequestsReport {
    /// Entities synchronized successfully across all resyncs.
    pub fn succeeded(&self) -> usize {
        self.syncs.iter().map(FullSyncReport::succeeded).sum()
    }

    /// Entities that failed, plus resyncs that could not run at all.
    pub fn failed(&self) -> usize {
        self.syncs
            .iter()
            .map(|sync| sync.failed() + usize::from(sync.error.is_some()))
            .sum()
    }
}

impl<S, D, T> SyncOrchestrator<S, D, T>
where
    S: EventQueue + ServerRegistry + SyncRequestStore,
    D: Directory,
    T: Transport,
{
    /// Run a full resync for every standing request.
    ///
    /// A request is deleted once its resync fully succeeds and retained
    /// otherwise. Requests for servers that no longer exist are dropped.
    pub async fn process_sync_requests(&self) -> SyncResult<RequestsReport> {
        let requests = self.store.list_sync_requests().await?;
        let mut report = RequestsReport::default();

        for request in requests {
            let Some(server) = self.store.get_server(request.server_id).await? else {
                info!(
                    "Dropping sync request {} for unregistered server {}",
                    request.id, request.server_id
                );
                self.store.delete_sync_request(request.id).await?;
                report.dropped += 1;
                continue;
            };

            let sync = self.full_resync(&server).await;
            if sync.is_complete_success() {
                self.store.delete_sync_request(request.id).await?;
                report.completed += 1;
            } else {
                warn!(
                    "Sync request for server '{}' kept for retry ({} failed)",
                    server.name,
                    sync.failed()
                );
                report.retained += 1;
            }
            report.syncs.push(sync);
        }

        Ok(report)
    }

    /// Like [`process_sync_requests`](Self::process_sync_requests), but stops
    /// when `shutdown` resolves first. The request being worked on stays queued.
    pub async fn process_sync_requests_until<F>(
        &self,
        shutdown: F,
    ) -> SyncResult<Option<RequestsReport>>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            report = self.process_sync_requests() => report.map(Some),
            _ = shutdown => {
                info!("Sync request processing interrupted by shutdown");
                Ok(None)
            }
        }
    }

    /// Fully resync one server by name, regardless of pending requests.
    ///
    /// On complete success any outstanding request for the server is cleared.
    pub async fn sync_server_now(&self, name: &str) -> SyncResult<FullSyncReport> {
        let server = self
            .store
            .get_server_by_name(name)
            .await?
            .ok_or_else(|| SyncError::ServerNotFound(name.to_string()))?;

        let sync = self.full_resync(&server).await;
        if sync.is_complete_success() {
            self.store.delete_sync_requests_for(server.id).await?;
        }
        Ok(sync)
    }

    /// Fully resync every registered server, clearing requests of those that succeed.
    pub async fn sync_all_servers(&self) -> SyncResult<RequestsReport> {
        let servers = self.store.list_servers().await?;
        let mut report = RequestsReport::default();

        for server in servers {
            let sync = self.full_resync(&server).await;
            if sync.is_complete_success() {
                report.completed += self.store.delete_sync_requests_for(server.id).await?;
            }
            report.syncs.push(sync);
        }
        Ok(report)
    }
}
