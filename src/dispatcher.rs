//! Capability-aware sending of operation lists.
//!
//! Servers without usable bulk support receive one request per operation in
//! input order. Bulk-capable servers receive `/Bulk` envelopes of at most
//! `maxOperations` entries, sent one after another so ids harvested from a
//! chunk are available to the next.

use crate::protocol::{BulkOperationResponse, BulkRequest, BulkResponse};
use crate::server::{ServerCapabilities, TargetServer};
use crate::transport::{ScimRequest, Transport, TransportError};
use crate::translator::{BulkId, CorrelationKey, IdTable, ScimOperation};
use log::{debug, error, warn};
use std::collections::{HashMap, HashSet};

/// Result of one operation on one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { status: u16 },
    Failed { status: Option<u16>, reason: String },
}

impl Outcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            status: None,
            reason: reason.into(),
        }
    }

    fn from_status(status: u16) -> Self {
        if status < 400 {
            Self::Success { status }
        } else {
            Self::Failed {
                status: Some(status),
                reason: format!("server responded with status {status}"),
            }
        }
    }

    fn from_error(error: &TransportError) -> Self {
        Self::Failed {
            status: error.status_code(),
            reason: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Per-operation outcomes of one dispatch, keyed by correlation id.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    outcomes: HashMap<BulkId, Outcome>,
    requests_sent: usize,
}

impl DispatchReport {
    pub fn outcome(&self, bulk_id: &BulkId) -> Option<&Outcome> {
        self.outcomes.get(bulk_id)
    }

    pub fn is_success(&self, bulk_id: &BulkId) -> bool {
        self.outcome(bulk_id).is_some_and(Outcome::is_success)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&BulkId, &Outcome)> {
        self.outcomes.iter()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Number of HTTP requests issued.
    pub fn requests_sent(&self) -> usize {
        self.requests_sent
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed() == 0
    }

    fn record(&mut self, bulk_id: BulkId, outcome: Outcome) {
        if let Outcome::Failed { reason, .. } = &outcome {
            warn!("Operation {} failed: {}", bulk_id, reason);
        }
        self.outcomes.insert(bulk_id, outcome);
    }
}

/// Group operation indices into bulk chunks of at most `max_operations`.
///
/// Operations keep their relative order. When everything fits in one chunk, or
/// nothing refers to a pending entity, the list is split into consecutive
/// chunks. Otherwise creating POSTs are sent first and the remaining
/// operations afterwards, so the second pass can use harvested ids.
pub fn plan_chunks(operations: &[ScimOperation], max_operations: usize) -> Vec<Vec<usize>> {
    let max = max_operations.max(1);
    let indices: Vec<usize> = (0..operations.len()).collect();

    let needs_two_passes = operations.len() > max
        && operations
            .iter()
            .any(|operation| operation.creates().is_none() && operation.has_pending_references());

    let passes = if needs_two_passes {
        let (creates, rest): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&index| operations[index].creates().is_some());
        vec![creates, rest]
    } else {
        vec![indices]
    };

    passes
        .iter()
        .flat_map(|pass| pass.chunks(max).map(<[usize]>::to_vec))
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

/// Sends operations to one server and correlates outcomes.
pub struct BulkDispatcher<'a, T> {
    transport: &'a T,
}

impl<'a, T: Transport> BulkDispatcher<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    /// Send `operations` according to `capabilities`.
    ///
    /// Ids of entities created along the way are recorded in `ids`.
    pub async fn dispatch(
        &self,
        server: &TargetServer,
        operations: Vec<ScimOperation>,
        capabilities: &ServerCapabilities,
        ids: &mut IdTable,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if operations.is_empty() {
            return report;
        }

        match capabilities.bulk_limit() {
            Some(max) => {
                self.dispatch_bulk(server, operations, max, ids, &mut report)
                    .await
            }
            None => {
                self.dispatch_sequential(server, operations, ids, &mut report)
                    .await
            }
        }

        debug!(
            "Dispatched to server '{}': {} succeeded, {} failed, {} requests",
            server.name,
            report.succeeded(),
            report.failed(),
            report.requests_sent()
        );
        report
    }

    async fn dispatch_sequential(
        &self,
        server: &TargetServer,
        operations: Vec<ScimOperation>,
        ids: &mut IdTable,
        report: &mut DispatchReport,
    ) {
        for mut operation in operations {
            operation.resolve_references(ids);
            let unresolved = operation.pending_references().first().map(|key| key.to_string());
            if let Some(key) = unresolved {
                let reason = format!("reference to {key} could not be resolved");
                report.record(operation.bulk_id, Outcome::failed(reason));
                continue;
            }

            report.requests_sent += 1;
            match self.transport.execute(server, operation.to_request()).await {
                Ok(response) => {
                    if let (Some(key), Some(id)) = (operation.creates(), response.resource_id()) {
                        ids.record(key.clone(), id);
                    }
                    report.record(operation.bulk_id, Outcome::from_status(response.status));
                }
                Err(e) => report.record(operation.bulk_id, Outcome::from_error(&e)),
            }
        }
    }

    async fn dispatch_bulk(
        &self,
        server: &TargetServer,
        operations: Vec<ScimOperation>,
        max: usize,
        ids: &mut IdTable,
        report: &mut DispatchReport,
    ) {
        let chunks = plan_chunks(&operations, max);
        let mut slots: Vec<Option<ScimOperation>> = operations.into_iter().map(Some).collect();

        for indices in chunks {
            let mut chunk = Vec::with_capacity(indices.len());
            let mut created: HashSet<CorrelationKey> = HashSet::new();

            for index in indices {
                let Some(mut operation) = slots.get_mut(index).and_then(Option::take) else {
                    continue;
                };
                operation.resolve_references(ids);

                let unresolved = operation
                    .pending_references()
                    .into_iter()
                    .find(|key| !created.contains(*key))
                    .cloned();
                if let Some(key) = unresolved {
                    let reason = format!("reference to {key} is neither known nor created earlier");
                    report.record(operation.bulk_id, Outcome::failed(reason));
                    continue;
                }

                if let Some(key) = operation.creates() {
                    created.insert(key.clone());
                }
                chunk.push(operation);
            }

            if !chunk.is_empty() {
                self.send_chunk(server, chunk, ids, report).await;
            }
        }
    }

    async fn send_chunk(
        &self,
        server: &TargetServer,
        chunk: Vec<ScimOperation>,
        ids: &mut IdTable,
        report: &mut DispatchReport,
    ) {
        let envelope = BulkRequest::new(chunk.iter().map(ScimOperation::to_bulk_operation).collect());
        let body = match serde_json::to_value(&envelope) {
            Ok(body) => body,
            Err(e) => {
                fail_chunk(chunk, &format!("failed to encode bulk request: {e}"), report);
                return;
            }
        };

        report.requests_sent += 1;
        let response = match self.transport.execute(server, ScimRequest::post("/Bulk", body)).await {
            Ok(response) => response,
            Err(e) => {
                fail_chunk(chunk, &e.to_string(), report);
                return;
            }
        };

        let bulk: BulkResponse = match response.json() {
            Ok(bulk) => bulk,
            Err(e) => {
                error!("Malformed /Bulk response from server '{}': {}", server.name, e);
                fail_chunk(chunk, "malformed bulk response", report);
                return;
            }
        };
        if !bulk.is_well_formed() {
            error!(
                "/Bulk response from server '{}' lacks the BulkResponse schema",
                server.name
            );
            fail_chunk(chunk, "bulk response lacks the BulkResponse schema", report);
            return;
        }

        let by_bulk_id: HashMap<&str, &BulkOperationResponse> = bulk
            .operations
            .iter()
            .filter_map(|sub| sub.bulk_id.as_deref().map(|bulk_id| (bulk_id, sub)))
            .collect();

        for (position, operation) in chunk.into_iter().enumerate() {
            let wire_id = operation.bulk_id.to_string();
            let sub = by_bulk_id.get(wire_id.as_str()).copied().or_else(|| {
                bulk.operations
                    .get(position)
                    .filter(|sub| sub.bulk_id.is_none())
            });

            let Some(sub) = sub else {
                report.record(operation.bulk_id, Outcome::failed("no sub-response"));
                continue;
            };

            if sub.is_success() {
                if let (Some(key), Some(id)) = (operation.creates(), sub.resource_id()) {
                    ids.record(key.clone(), id);
                }
            }
            report.record(operation.bulk_id, Outcome::from_status(sub.status));
        }
    }
}

fn fail_chunk(chunk: Vec<ScimOperation>, reason: &str, report: &mut DispatchReport) {
    for operation in chunk {
        report.record(operation.bulk_id, Outcome::failed(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventId;
    use crate::protocol::{EntityKind, ScimMethod};
    use crate::translator::{OperationBody, PatchChange, ResourcePath, ResourceRef};
    use proptest::prelude::*;
    use serde_json::json;

    fn create(kind: EntityKind, id: &str) -> ScimOperation {
        ScimOperation {
            method: ScimMethod::Post,
            path: ResourcePath::collection(kind),
            body: Some(OperationBody::Resource(json!({"externalId": id}))),
            bulk_id: BulkId::Entity(CorrelationKey::new(kind, id)),
        }
    }

    fn delete_resolved(id: &str) -> ScimOperation {
        ScimOperation {
            method: ScimMethod::Delete,
            path: ResourcePath::resource(EntityKind::User, ResourceRef::Resolved(id.into())),
            body: None,
            bulk_id: BulkId::Event(EventId::new()),
        }
    }

    fn add_member(group: &str, user: &str) -> ScimOperation {
        ScimOperation {
            method: ScimMethod::Patch,
            path: ResourcePath::resource(
                EntityKind::Group,
                ResourceRef::Pending(CorrelationKey::group(group)),
            ),
            body: Some(OperationBody::Patch(vec![PatchChange::AddMembers(vec![
                ResourceRef::Pending(CorrelationKey::user(user)),
            ])])),
            bulk_id: BulkId::Members(CorrelationKey::group(group)),
        }
    }

    #[test]
    fn test_single_chunk_when_within_limit() {
        let operations = vec![create(EntityKind::Group, "g1"), add_member("g1", "u1")];
        assert_eq!(plan_chunks(&operations, 10), vec![vec![0, 1]]);
    }

    #[test]
    fn test_two_passes_put_creates_first() {
        let operations = vec![
            create(EntityKind::User, "u1"),
            add_member("g1", "u1"),
            create(EntityKind::Group, "g1"),
        ];
        assert_eq!(plan_chunks(&operations, 2), vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn test_outcome_from_status() {
        assert!(Outcome::from_status(204).is_success());
        assert_eq!(
            Outcome::from_status(409),
            Outcome::Failed {
                status: Some(409),
                reason: "server responded with status 409".to_string()
            }
        );
    }

    proptest! {
        #[test]
        fn test_independent_operations_chunk_in_order(count in 1usize..60, max in 1usize..12) {
            let operations: Vec<_> = (0..count)
                .map(|i| delete_resolved(&format!("u{i}")))
                .collect();
            let chunks = plan_chunks(&operations, max);

            prop_assert_eq!(chunks.len(), count.div_ceil(max));
            prop_assert!(chunks.iter().all(|chunk| chunk.len() <= max));
            let flattened: Vec<usize> = chunks.into_iter().flatten().collect();
            prop_assert_eq!(flattened, (0..count).collect::<Vec<_>>());
        }

        #[test]
        fn test_every_operation_planned_once(groups in 1usize..20, max in 1usize..8) {
            let mut operations = Vec::new();
            for g in 0..groups {
                operations.push(create(EntityKind::Group, &format!("g{g}")));
                operations.push(add_member(&format!("g{g}"), "u0"));
            }
            let chunks = plan_chunks(&operations, max);

            let mut seen: Vec<usize> = chunks.iter().flatten().copied().collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..operations.len()).collect::<Vec<_>>());
            prop_assert!(chunks.iter().all(|chunk| chunk.len() <= max));

            if operations.len() > max {
                let first_dependent = chunks
                    .iter()
                    .position(|chunk| chunk.iter().any(|&i| operations[i].creates().is_none()))
                    .unwrap();
                let last_create = chunks
                    .iter()
                    .rposition(|chunk| chunk.iter().any(|&i| operations[i].creates().is_some()))
                    .unwrap();
                prop_assert!(last_create <= first_dependent);
            }
        }
    }
}
