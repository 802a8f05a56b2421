//! In-memory implementation of all three store traits.
//!
//! Events are kept in their serialized JSON form, the same shape a database
//! row would hold. Event secrets never enter that form; they live in a
//! separate volatile map and are re-attached when events are listed, so they
//! are lost when the process restarts.
//!
//! All operations take a single `tokio::sync::RwLock`, which makes uniqueness
//! checks and request deduplication atomic.

use crate::event::{EventId, IdentityEvent, Secret};
use crate::server::{NewServer, ServerCapabilities, ServerId, TargetServer};
use crate::storage::{EventQueue, ServerRegistry, StoreError, SyncRequest, SyncRequestStore};
use log::debug;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct StoreState {
    // Enqueue order.
    events: Vec<(EventId, Value)>,
    secrets: HashMap<EventId, Secret>,
    servers: BTreeMap<ServerId, TargetServer>,
    next_server_id: u64,
    requests: Vec<SyncRequest>,
}

impl StoreState {
    fn check_unique(&self, name: &str, url: &str, except: Option<ServerId>) -> Result<(), StoreError> {
        let others = self
            .servers
            .values()
            .filter(|server| Some(server.id) != except);
        for server in others {
            if server.name == name {
                return Err(StoreError::duplicate("name", name));
            }
            if server.base_url == url {
                return Err(StoreError::duplicate("url", url));
            }
        }
        Ok(())
    }
}

/// Thread-safe in-memory store for events, servers and sync requests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stats(&self) -> InMemoryStoreStats {
        let state = self.state.read().await;
        InMemoryStoreStats {
            pending_events: state.events.len(),
            servers: state.servers.len(),
            sync_requests: state.requests.len(),
        }
    }

    /// Remove everything (useful for testing).
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        *state = StoreState::default();
    }
}

impl EventQueue for InMemoryStore {
    async fn enqueue(&self, mut event: IdentityEvent) -> Result<EventId, StoreError> {
        let id = event.id;
        let secret = event.secret.take();
        let record = serde_json::to_value(&event)?;

        let mut state = self.state.write().await;
        if state.events.iter().any(|(existing, _)| *existing == id) {
            return Err(StoreError::duplicate("event id", id.to_string()));
        }
        state.events.push((id, record));
        if let Some(secret) = secret {
            state.secrets.insert(id, secret);
        }
        debug!("Queued {} event {}", event.kind, id);
        Ok(id)
    }

    async fn list_pending(&self) -> Result<Vec<IdentityEvent>, StoreError> {
        let state = self.state.read().await;
        state
            .events
            .iter()
            .map(|(id, record)| -> Result<IdentityEvent, StoreError> {
                let mut event: IdentityEvent = serde_json::from_value(record.clone())?;
                event.secret = state.secrets.get(id).cloned();
                Ok(event)
            })
            .collect()
    }

    async fn delete_event(&self, id: EventId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.events.len();
        state.events.retain(|(existing, _)| *existing != id);
        state.secrets.remove(&id);
        Ok(state.events.len() != before)
    }
}

impl ServerRegistry for InMemoryStore {
    async fn insert_server(&self, server: NewServer) -> Result<TargetServer, StoreError> {
        let mut state = self.state.write().await;
        state.check_unique(&server.name, &server.url, None)?;

        state.next_server_id += 1;
        let stored = TargetServer {
            id: ServerId(state.next_server_id),
            name: server.name,
            base_url: server.url,
            credential: server.credential,
            cached_capabilities: None,
        };
        state.servers.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_servers(&self) -> Result<Vec<TargetServer>, StoreError> {
        let state = self.state.read().await;
        Ok(state.servers.values().cloned().collect())
    }

    async fn get_server(&self, id: ServerId) -> Result<Option<TargetServer>, StoreError> {
        let state = self.state.read().await;
        Ok(state.servers.get(&id).cloned())
    }

    async fn get_server_by_name(&self, name: &str) -> Result<Option<TargetServer>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .servers
            .values()
            .find(|server| server.name == name)
            .cloned())
    }

    async fn update_server(&self, server: TargetServer) -> Result<TargetServer, StoreError> {
        let mut state = self.state.write().await;
        if !state.servers.contains_key(&server.id) {
            return Err(StoreError::not_found("Server", server.id));
        }
        state.check_unique(&server.name, &server.base_url, Some(server.id))?;
        state.servers.insert(server.id, server.clone());
        Ok(server)
    }

    async fn set_capabilities(
        &self,
        id: ServerId,
        capabilities: ServerCapabilities,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let server = state
            .servers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Server", id))?;
        server.cached_capabilities = Some(capabilities);
        Ok(())
    }

    async fn remove_server(&self, id: ServerId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.servers.remove(&id).is_some())
    }
}

impl SyncRequestStore for InMemoryStore {
    async fn add_sync_request(&self, server_id: ServerId) -> Result<SyncRequest, StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .requests
            .iter()
            .find(|request| request.server_id == server_id)
        {
            debug!("Sync request for server {} already pending", server_id);
            return Ok(existing.clone());
        }

        let request = SyncRequest::new(server_id);
        state.requests.push(request.clone());
        Ok(request)
    }

    async fn list_sync_requests(&self) -> Result<Vec<SyncRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state.requests.clone())
    }

    async fn delete_sync_request(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.requests.len();
        state.requests.retain(|request| request.id != id);
        Ok(state.requests.len() != before)
    }

    async fn delete_sync_requests_for(&self, server_id: ServerId) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let before = state.requests.len();
        state.requests.retain(|request| request.server_id != server_id);
        Ok(before - state.requests.len())
    }
}

/// Record counts of an [`InMemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InMemoryStoreStats {
    pub pending_events: usize,
    pub servers: usize,
    pub sync_requests: usize,
}
