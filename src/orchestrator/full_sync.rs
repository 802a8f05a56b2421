use super::SyncOrchestrator;
use crate::directory::{Directory, LocalGroup, LocalUser};
use crate::dispatcher::BulkDispatcher;
use crate::error::{SyncError, SyncResult};
use crate::protocol::ScimMethod;
use crate::server::{ServerId, TargetServer};
use crate::storage::{EventQueue, ServerRegistry, SyncRequestStore};
use crate::translator::{BulkId, CorrelationKey, IdTable, ScimOperation};
use crate::transport::Transport;
use log::{info, warn};
use std::fmt;

/// What a full resync did for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    UserCreated,
    UserUpdated,
    GroupCreated,
    GroupUpdated,
    GroupMembersUpdated,
}

impl SyncAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UserCreated => "User Created",
            Self::UserUpdated => "User Info Updated",
            Self::GroupCreated => "Group Created",
            Self::GroupUpdated => "Group Info Updated",
            Self::GroupMembersUpdated => "Group Members Updated",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    pub action: SyncAction,
    /// Local id of the user or group.
    pub local_id: String,
    pub success: bool,
}

/// Operator-facing summary of one full resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullSyncReport {
    pub server_id: ServerId,
    pub server_name: String,
    pub entries: Vec<SyncEntry>,
    /// Set when the resync could not run at all.
    pub error: Option<String>,
}

impl FullSyncReport {
    fn new(server: &TargetServer) -> Self {
        Self {
            server_id: server.id,
            server_name: server.name.clone(),
            entries: Vec::new(),
            error: None,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|entry| entry.success).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    pub fn is_complete_success(&self) -> bool {
        self.error.is_none() && self.failed() == 0
    }
}

struct PlannedEntry {
    action: SyncAction,
    local_id: String,
    bulk_id: BulkId,
}

fn planned(operation: &ScimOperation, created: SyncAction, updated: SyncAction, local_id: &str) -> PlannedEntry {
    PlannedEntry {
        action: if operation.method == ScimMethod::Post {
            created
        } else {
            updated
        },
        local_id: local_id.to_string(),
        bulk_id: operation.bulk_id.clone(),
    }
}

impl<S, D, T> SyncOrchestrator<S, D, T>
where
    S: EventQueue + ServerRegistry + SyncRequestStore,
    D: Directory,
    T: Transport,
{
    /// Reconcile every local user and group against one server.
    ///
    /// Entities the server already knows (by `externalId`) are replaced with
    /// PUT; the rest are created. Every group with members then gets a patch
    /// adding its current members. Running it twice yields no new creates.
    pub async fn full_resync(&self, server: &TargetServer) -> FullSyncReport {
        let mut report = FullSyncReport::new(server);

        match self.with_deadline(server, self.resync_entries(server)).await {
            Ok(entries) => report.entries = entries,
            Err(e) => {
                warn!("Full resync of server '{}' failed: {}", server.name, e);
                report.error = Some(e.to_string());
            }
        }

        info!(
            "Full resync of server '{}': {} succeeded, {} failed",
            server.name,
            report.succeeded(),
            report.failed()
        );
        report
    }

    async fn resync_entries(&self, server: &TargetServer) -> SyncResult<Vec<SyncEntry>> {
        let capabilities = self.capabilities(server).await?;
        let users = self
            .directory
            .list_users()
            .await
            .map_err(|e| SyncError::Directory(e.to_string()))?;
        let groups = self
            .directory
            .list_groups()
            .await
            .map_err(|e| SyncError::Directory(e.to_string()))?;

        let mut ids = IdTable::new();
        let (operations, plan) = self
            .plan_resync(server, &users, &groups, &mut ids)
            .await;

        let report = BulkDispatcher::new(&self.transport)
            .dispatch(server, operations, &capabilities, &mut ids)
            .await;

        Ok(plan
            .into_iter()
            .map(|entry| SyncEntry {
                success: report.is_success(&entry.bulk_id),
                action: entry.action,
                local_id: entry.local_id,
            })
            .collect())
    }

    async fn plan_resync(
        &self,
        server: &TargetServer,
        users: &[LocalUser],
        groups: &[LocalGroup],
        ids: &mut IdTable,
    ) -> (Vec<ScimOperation>, Vec<PlannedEntry>) {
        let mut operations = Vec::new();
        let mut plan = Vec::new();

        for user in users {
            let existing = ids
                .resolve(&self.transport, server, CorrelationKey::user(user.id.clone()))
                .await;
            let operation = self.translator.user_upsert(user, existing);
            plan.push(planned(
                &operation,
                SyncAction::UserCreated,
                SyncAction::UserUpdated,
                &user.id,
            ));
            operations.push(operation);
        }

        for group in groups {
            let existing = ids
                .resolve(&self.transport, server, CorrelationKey::group(group.id.clone()))
                .await;
            let operation = self.translator.group_upsert(group, existing);
            plan.push(planned(
                &operation,
                SyncAction::GroupCreated,
                SyncAction::GroupUpdated,
                &group.id,
            ));
            operations.push(operation);
        }

        for group in groups.iter().filter(|group| !group.members.is_empty()) {
            let target = ids.reference_for(&CorrelationKey::group(group.id.clone()));
            let mut members = Vec::with_capacity(group.members.len());
            for member in &group.members {
                members.push(
                    ids.resolve(&self.transport, server, CorrelationKey::user(member.clone()))
                        .await,
                );
            }

            let operation = self.translator.members_patch(&group.id, target, members);
            plan.push(PlannedEntry {
                action: SyncAction::GroupMembersUpdated,
                local_id: group.id.clone(),
                bulk_id: operation.bulk_id.clone(),
            });
            operations.push(operation);
        }

        (operations, plan)
    }
}
