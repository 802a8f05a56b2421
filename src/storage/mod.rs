//! Persistence contracts for the sync engine.
//!
//! The engine owns three kinds of shared state, each behind its own trait:
//!
//! - [`EventQueue`]: identity events awaiting propagation
//! - [`ServerRegistry`]: registered SCIM servers and their cached capabilities
//! - [`SyncRequestStore`]: standing full-sync requests, at most one per server
//!
//! Implementations must serialize concurrent mutation per logical row; the
//! uniqueness of server names and URLs and the one-request-per-server rule are
//! enforced by the store, not by callers. Nothing else is shared between cycles.
//!
//! # Example Usage
//!
//! ```rust
//! use scim_sync::storage::{EventQueue, InMemoryStore, SyncRequestStore};
//! use scim_sync::server::ServerId;
//! use scim_sync::IdentityEvent;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryStore::new();
//!
//! let id = store.enqueue(IdentityEvent::user_created("alice")).await?;
//! assert_eq!(store.list_pending().await?.len(), 1);
//! assert!(store.delete_event(id).await?);
//!
//! store.add_sync_request(ServerId(1)).await?;
//! store.add_sync_request(ServerId(1)).await?;
//! assert_eq!(store.list_sync_requests().await?.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod in_memory;


pub use errors::StoreError;
pub use in_memory::{InMemoryStore, InMemoryStoreStats};

use crate::event::{EventId, IdentityEvent};
use crate::server::{NewServer, ServerCapabilities, ServerId, TargetServer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use uuid::Uuid;

/// A standing request to fully resync one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub id: Uuid,
    pub server_id: ServerId,
    pub created_at: DateTime<Utc>,
}

impl SyncRequest {
    pub fn new(server_id: ServerId) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id,
            created_at: Utc::now(),
        }
    }
}

/// Durable queue of pending identity events.
pub trait EventQueue: Send + Sync {
    /// Append an event. Secrets are held only in process memory.
    fn enqueue(
        &self,
        event: IdentityEvent,
    ) -> impl Future<Output = Result<EventId, StoreError>> + Send;

    /// All pending events in enqueue order.
    fn list_pending(&self) -> impl Future<Output = Result<Vec<IdentityEvent>, StoreError>> + Send;

    /// Remove an event. Returns whether it existed.
    fn delete_event(&self, id: EventId) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Registry of target servers.
pub trait ServerRegistry: Send + Sync {
    /// Persist a validated registration and assign it an id.
    ///
    /// Fails with [`StoreError::Duplicate`] (field `name` or `url`) when
    /// another server already uses the name or normalized URL.
    fn insert_server(
        &self,
        server: NewServer,
    ) -> impl Future<Output = Result<TargetServer, StoreError>> + Send;

    /// All servers ordered by id.
    fn list_servers(&self) -> impl Future<Output = Result<Vec<TargetServer>, StoreError>> + Send;

    fn get_server(
        &self,
        id: ServerId,
    ) -> impl Future<Output = Result<Option<TargetServer>, StoreError>> + Send;

    fn get_server_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<TargetServer>, StoreError>> + Send;

    /// Replace a stored server, keeping name and URL unique.
    fn update_server(
        &self,
        server: TargetServer,
    ) -> impl Future<Output = Result<TargetServer, StoreError>> + Send;

    /// Cache the capabilities discovered during the latest cycle.
    fn set_capabilities(
        &self,
        id: ServerId,
        capabilities: ServerCapabilities,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a server. Returns whether it existed.
    fn remove_server(&self, id: ServerId) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Store of standing full-sync requests.
pub trait SyncRequestStore: Send + Sync {
    /// File a request for a server, returning the outstanding request if one
    /// already exists.
    fn add_sync_request(
        &self,
        server_id: ServerId,
    ) -> impl Future<Output = Result<SyncRequest, StoreError>> + Send;

    /// All outstanding requests, oldest first.
    fn list_sync_requests(
        &self,
    ) -> impl Future<Output = Result<Vec<SyncRequest>, StoreError>> + Send;

    fn delete_sync_request(&self, id: Uuid)
    -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Remove every request for a server. Returns how many were removed.
    fn delete_sync_requests_for(
        &self,
        server_id: ServerId,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;
}
