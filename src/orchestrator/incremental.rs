use super::SyncOrchestrator;
use crate::directory::Directory;
use crate::dispatcher::BulkDispatcher;
use crate::error::SyncResult;
use crate::event::{EventId, IdentityEvent};
use crate::server::{ServerId, TargetServer};
use crate::storage::{EventQueue, ServerRegistry, SyncRequestStore};
use crate::translator::{BulkId, IdTable, ScimOperation, Translation};
use crate::transport::Transport;
use futures::stream::{self, StreamExt};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::future::Future;

/// How one server fared during an incremental update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUpdateSummary {
    pub server_id: ServerId,
    pub server_name: String,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when the server could not be processed at all.
    pub error: Option<String>,
}

/// Outcome of one incremental update cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub events_processed: usize,
    pub events_deleted: usize,
    pub events_retained: usize,
    pub servers: Vec<ServerUpdateSummary>,
}

impl UpdateReport {
    pub fn succeeded(&self) -> usize {
        self.servers.iter().map(|server| server.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.servers.iter().map(|server| server.failed).sum()
    }
}

struct ServerPass {
    summary: ServerUpdateSummary,
    satisfied: HashSet<EventId>,
}

/// Everything decided by a cycle before the queue is touched.
struct UpdatePlan {
    report: UpdateReport,
    satisfied: Vec<EventId>,
}

impl<S, D, T> SyncOrchestrator<S, D, T>
where
    S: EventQueue + ServerRegistry + SyncRequestStore,
    D: Directory,
    T: Transport,
{
    /// Apply every queued event to every registered server.
    ///
    /// An event is deleted only once it has succeeded on all servers; events
    /// that can never produce an operation are deleted right away.
    pub async fn run_incremental_update(&self) -> SyncResult<UpdateReport> {
        let plan = self.plan_incremental_update().await?;
        self.commit(plan).await
    }

    /// Like [`run_incremental_update`](Self::run_incremental_update), but stops
    /// when `shutdown` resolves first. An interrupted cycle deletes nothing.
    pub async fn run_incremental_update_until<F>(
        &self,
        shutdown: F,
    ) -> SyncResult<Option<UpdateReport>>
    where
        F: Future<Output = ()>,
    {
        let plan = tokio::select! {
            plan = self.plan_incremental_update() => plan?,
            _ = shutdown => {
                info!("Incremental update interrupted by shutdown; queue left untouched");
                return Ok(None);
            }
        };
        self.commit(plan).await.map(Some)
    }

    async fn plan_incremental_update(&self) -> SyncResult<UpdatePlan> {
        let events = self.store.list_pending().await?;
        let mut report = UpdateReport {
            events_processed: events.len(),
            ..UpdateReport::default()
        };
        if events.is_empty() {
            return Ok(UpdatePlan {
                report,
                satisfied: Vec::new(),
            });
        }

        let servers = self.store.list_servers().await?;
        info!(
            "Incremental update: {} events, {} servers",
            events.len(),
            servers.len()
        );

        let mut satisfied = Vec::new();
        let mut translatable = Vec::new();
        for event in events {
            match self.translator.skip_reason(&event) {
                Some(reason) => {
                    warn!("Dropping event {} ({}): {}", event.id, event.kind, reason);
                    satisfied.push(event.id);
                }
                None => translatable.push(event),
            }
        }

        let passes: Vec<ServerPass> = stream::iter(servers.iter())
            .map(|server| self.update_server(server, &translatable))
            .buffer_unordered(self.config.server_concurrency())
            .collect()
            .await;

        satisfied.extend(
            translatable
                .iter()
                .map(|event| event.id)
                .filter(|id| passes.iter().all(|pass| pass.satisfied.contains(id))),
        );

        report.servers = passes.into_iter().map(|pass| pass.summary).collect();
        report.servers.sort_by_key(|summary| summary.server_id);
        Ok(UpdatePlan { report, satisfied })
    }

    async fn commit(&self, plan: UpdatePlan) -> SyncResult<UpdateReport> {
        let UpdatePlan {
            mut report,
            satisfied,
        } = plan;

        for id in satisfied {
            if self.store.delete_event(id).await? {
                report.events_deleted += 1;
            }
        }
        report.events_retained = report.events_processed - report.events_deleted;

        info!(
            "Incremental update finished: {} events deleted, {} retained",
            report.events_deleted, report.events_retained
        );
        Ok(report)
    }

    async fn update_server(&self, server: &TargetServer, events: &[IdentityEvent]) -> ServerPass {
        let result = self
            .with_deadline(server, self.apply_events(server, events))
            .await;

        match result {
            Ok((satisfied, succeeded, failed)) => ServerPass {
                summary: ServerUpdateSummary {
                    server_id: server.id,
                    server_name: server.name.clone(),
                    succeeded,
                    failed,
                    error: None,
                },
                satisfied,
            },
            Err(e) => {
                warn!("Incremental update of server '{}' failed: {}", server.name, e);
                ServerPass {
                    summary: ServerUpdateSummary {
                        server_id: server.id,
                        server_name: server.name.clone(),
                        succeeded: 0,
                        failed: events.len(),
                        error: Some(e.to_string()),
                    },
                    satisfied: HashSet::new(),
                }
            }
        }
    }

    /// Translate and dispatch all events for one server, returning the events
    /// it satisfied plus operation counts.
    async fn apply_events(
        &self,
        server: &TargetServer,
        events: &[IdentityEvent],
    ) -> SyncResult<(HashSet<EventId>, usize, usize)> {
        let capabilities = self.capabilities(server).await?;
        let mut ids = IdTable::new();
        let mut satisfied = HashSet::new();
        let mut owners: HashMap<BulkId, EventId> = HashMap::new();
        let mut operations: Vec<ScimOperation> = Vec::with_capacity(events.len());

        for event in events {
            let translation = self
                .translator
                .translate(event, &self.transport, server, &mut ids)
                .await;
            let mut operation = match translation {
                Translation::Operation(operation) => operation,
                Translation::Skip(_) => {
                    satisfied.insert(event.id);
                    continue;
                }
            };

            // A second create of the same entity must not shadow the first's outcome.
            if owners.contains_key(&operation.bulk_id) {
                operation.bulk_id = BulkId::Event(event.id);
            }
            owners.insert(operation.bulk_id.clone(), event.id);
            operations.push(operation);
        }

        let (mut ordered, rest): (Vec<_>, Vec<_>) = operations
            .into_iter()
            .partition(|operation| operation.creates().is_some());
        ordered.extend(rest);

        let report = BulkDispatcher::new(&self.transport)
            .dispatch(server, ordered, &capabilities, &mut ids)
            .await;

        for (bulk_id, event_id) in owners {
            if report.is_success(&bulk_id) {
                satisfied.insert(event_id);
            }
        }
        Ok((satisfied, report.succeeded(), report.failed()))
    }
}
