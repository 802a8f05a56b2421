//! Per-cycle table of server-side ids.

use super::{CorrelationKey, ResourceRef};
use crate::server::TargetServer;
use crate::transport::{Transport, find_resource_id};
use log::warn;
use std::collections::HashMap;

/// Server-side ids known for one server during one cycle.
///
/// Built fresh at the start of every cycle; nothing is carried across cycles
/// since the server can change independently. An entry of `None` records a
/// confirmed absence.
#[derive(Debug, Clone, Default)]
pub struct IdTable {
    entries: HashMap<CorrelationKey, Option<String>>,
}

impl IdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the server id of an entity.
    pub fn record(&mut self, key: CorrelationKey, id: impl Into<String>) {
        self.entries.insert(key, Some(id.into()));
    }

    /// Record that the server has no such entity.
    pub fn record_absent(&mut self, key: CorrelationKey) {
        self.entries.entry(key).or_insert(None);
    }

    pub fn resolved_id(&self, key: &CorrelationKey) -> Option<&str> {
        self.entries.get(key).and_then(|id| id.as_deref())
    }

    /// Whether a lookup for this key already happened.
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Reference from the table alone, without network access.
    pub fn reference_for(&self, key: &CorrelationKey) -> ResourceRef {
        match self.resolved_id(key) {
            Some(id) => ResourceRef::Resolved(id.to_string()),
            None => ResourceRef::Pending(key.clone()),
        }
    }

    /// Resolve a key, querying the server by `externalId` on first use.
    ///
    /// A failed lookup is logged and yields a forward reference; it is not
    /// recorded, so a later call retries.
    pub async fn resolve<T: Transport>(
        &mut self,
        transport: &T,
        server: &TargetServer,
        key: CorrelationKey,
    ) -> ResourceRef {
        if self.contains(&key) {
            return self.reference_for(&key);
        }

        match find_resource_id(transport, server, key.kind, &key.local_id).await {
            Ok(Some(id)) => {
                self.record(key, id.clone());
                ResourceRef::Resolved(id)
            }
            Ok(None) => {
                self.record_absent(key.clone());
                ResourceRef::Pending(key)
            }
            Err(e) => {
                warn!(
                    "Failed to look up {} on server '{}', using forward reference: {}",
                    key, server.name, e
                );
                ResourceRef::Pending(key)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
