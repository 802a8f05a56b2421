//! Drives synchronization against every registered server.
//!
//! Three entry points share one [`SyncOrchestrator`]:
//!
//! - [`SyncOrchestrator::run_incremental_update`] replays queued events
//! - [`SyncOrchestrator::full_resync`] reconciles the whole directory against one server
//! - [`SyncOrchestrator::process_sync_requests`] runs full resyncs for standing requests
//!
//! Each cycle starts from scratch: capabilities are fetched again and a fresh
//! [`IdTable`](crate::translator::IdTable) is built per server, so nothing but
//! the stores carries state between cycles.

mod full_sync;
mod incremental;
mod requests;

pub use full_sync::{FullSyncReport, SyncAction, SyncEntry};
pub use incremental::{ServerUpdateSummary, UpdateReport};
pub use requests::RequestsReport;

use crate::config::SyncConfig;
use crate::directory::Directory;
use crate::error::{SyncError, SyncResult};
use crate::server::{ServerCapabilities, TargetServer};
use crate::storage::{EventQueue, ServerRegistry, SyncRequestStore};
use crate::translator::OperationTranslator;
use crate::transport::{Transport, service_provider_config};
use log::{debug, warn};
use std::future::Future;

/// Periodic sync driver over a store, a directory and a transport.
pub struct SyncOrchestrator<S, D, T> {
    store: S,
    directory: D,
    transport: T,
    translator: OperationTranslator,
    config: SyncConfig,
}

impl<S, D, T> SyncOrchestrator<S, D, T>
where
    S: EventQueue + ServerRegistry + SyncRequestStore,
    D: Directory,
    T: Transport,
{
    pub fn new(store: S, directory: D, transport: T, config: SyncConfig) -> Self {
        Self {
            translator: OperationTranslator::new(&config),
            store,
            directory,
            transport,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Discover the server's capabilities and cache them in the registry.
    async fn capabilities(&self, server: &TargetServer) -> SyncResult<ServerCapabilities> {
        let document = service_provider_config(&self.transport, server).await?;
        let capabilities = ServerCapabilities::from(&document);
        debug!(
            "Server '{}' capabilities: bulk={} max={}",
            server.name, capabilities.bulk_supported, capabilities.max_bulk_operations
        );

        if server.cached_capabilities != Some(capabilities) {
            if let Err(e) = self.store.set_capabilities(server.id, capabilities).await {
                warn!(
                    "Failed to cache capabilities of server '{}': {}",
                    server.name, e
                );
            }
        }
        Ok(capabilities)
    }

    /// Run `work` under the configured per-server cycle deadline.
    async fn with_deadline<F, R>(&self, server: &TargetServer, work: F) -> SyncResult<R>
    where
        F: Future<Output = SyncResult<R>>,
    {
        match self.config.cycle_deadline {
            Some(deadline) => tokio::time::timeout(deadline, work)
                .await
                .unwrap_or_else(|_| Err(SyncError::DeadlineExceeded(server.name.clone()))),
            None => work.await,
        }
    }
}
