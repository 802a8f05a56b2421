//! Registration and maintenance of target servers.

use crate::error::{SyncError, SyncResult};
use crate::server::{
    NewServer, ServerCapabilities, ServerId, ServerSummary, ServerUpdate, TargetServer,
};
use crate::storage::{ServerRegistry, SyncRequest, SyncRequestStore};
use crate::transport::{Transport, service_provider_config};
use log::{info, warn};

/// Administrative operations over the server registry.
pub struct ServerAdministration<S, T> {
    store: S,
    transport: T,
}

impl<S, T> ServerAdministration<S, T>
where
    S: ServerRegistry + SyncRequestStore,
    T: Transport,
{
    pub fn new(store: S, transport: T) -> Self {
        Self { store, transport }
    }

    /// Register a server and file a full-sync request for it.
    ///
    /// The name must be non-empty and the URL must use http or https; trailing
    /// slashes are stripped before the uniqueness check.
    pub async fn register(&self, server: NewServer) -> SyncResult<TargetServer> {
        let server = server.validate()?;
        let stored = self.store.insert_server(server).await?;
        info!(
            "Registered SCIM server '{}' at {} (id {})",
            stored.name, stored.base_url, stored.id
        );

        if let Err(e) = self.store.add_sync_request(stored.id).await {
            warn!(
                "Could not file initial sync request for server '{}': {}",
                stored.name, e
            );
        }
        Ok(stored)
    }

    /// Change name, URL or credential of the server called `name`.
    pub async fn update(&self, name: &str, changes: ServerUpdate) -> SyncResult<TargetServer> {
        let existing = self.find(name).await?;
        let updated = changes.apply_to(existing)?;
        let stored = self.store.update_server(updated).await?;
        info!("Updated SCIM server '{}' (id {})", stored.name, stored.id);
        Ok(stored)
    }

    /// Remove a server and its pending sync requests.
    ///
    /// Resources already provisioned on the server are left in place.
    pub async fn unregister(&self, id: ServerId) -> SyncResult<bool> {
        let removed = self.store.remove_server(id).await?;
        let requests = self.store.delete_sync_requests_for(id).await?;
        if removed {
            info!(
                "Unregistered SCIM server {} ({} pending sync requests dropped)",
                id, requests
            );
        }
        Ok(removed)
    }

    /// File a full-sync request; a request already pending is returned as is.
    pub async fn request_sync(&self, id: ServerId) -> SyncResult<SyncRequest> {
        if self.store.get_server(id).await?.is_none() {
            return Err(SyncError::ServerNotFound(id.to_string()));
        }
        Ok(self.store.add_sync_request(id).await?)
    }

    /// Check that a server answers with a genuine ServiceProviderConfig.
    pub async fn verify(&self, server: &TargetServer) -> SyncResult<ServerCapabilities> {
        let document = service_provider_config(&self.transport, server).await?;
        Ok(ServerCapabilities::from(&document))
    }

    /// Verify a registered server and cache its capabilities.
    pub async fn verify_registered(&self, id: ServerId) -> SyncResult<ServerCapabilities> {
        let server = self
            .store
            .get_server(id)
            .await?
            .ok_or_else(|| SyncError::ServerNotFound(id.to_string()))?;
        let capabilities = self.verify(&server).await?;
        self.store.set_capabilities(id, capabilities).await?;
        Ok(capabilities)
    }

    /// Registered servers with credentials masked.
    pub async fn list(&self) -> SyncResult<Vec<ServerSummary>> {
        let servers = self.store.list_servers().await?;
        Ok(servers.iter().map(ServerSummary::from).collect())
    }

    async fn find(&self, name: &str) -> SyncResult<TargetServer> {
        self.store
            .get_server_by_name(name)
            .await?
            .ok_or_else(|| SyncError::ServerNotFound(name.to_string()))
    }
}
