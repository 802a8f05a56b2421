//! Strongly typed SCIM operations.
//!
//! References to entities the server may not know yet are kept as
//! [`ResourceRef::Pending`] and only rendered to the `bulkId:User:<id>` wire
//! form when the operation is serialized.

use super::IdTable;
use crate::event::{EventId, Secret};
use crate::protocol::{
    BulkOperation, EntityKind, PatchOpKind, PatchOperation, PatchRequest, ScimMethod,
};
use crate::transport::ScimRequest;
use serde_json::{Value, json};
use std::fmt;

/// Identifies a local entity: entity kind plus the source system's id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey {
    pub kind: EntityKind,
    pub local_id: String,
}

impl CorrelationKey {
    pub fn new(kind: EntityKind, local_id: impl Into<String>) -> Self {
        Self {
            kind,
            local_id: local_id.into(),
        }
    }

    pub fn user(local_id: impl Into<String>) -> Self {
        Self::new(EntityKind::User, local_id)
    }

    pub fn group(local_id: impl Into<String>) -> Self {
        Self::new(EntityKind::Group, local_id)
    }

    /// Wire form of a forward reference, e.g. `bulkId:User:alice`.
    pub fn bulk_reference(&self) -> String {
        format!("bulkId:{self}")
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.label(), self.local_id)
    }
}

/// A reference to a server-side resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    /// The server-assigned id is known.
    Resolved(String),
    /// Not yet known; expected to be created earlier in the same batch.
    Pending(CorrelationKey),
}

impl ResourceRef {
    pub fn as_wire(&self) -> String {
        match self {
            Self::Resolved(id) => id.clone(),
            Self::Pending(key) => key.bulk_reference(),
        }
    }

    pub fn pending(&self) -> Option<&CorrelationKey> {
        match self {
            Self::Pending(key) => Some(key),
            Self::Resolved(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending().is_some()
    }

    /// Replace a pending reference with its id once the table knows it.
    pub fn resolve(&mut self, ids: &IdTable) {
        if let Self::Pending(key) = self {
            if let Some(id) = ids.resolved_id(key) {
                *self = Self::Resolved(id.to_string());
            }
        }
    }
}

/// Correlation id of an operation; rendered as the wire `bulkId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BulkId {
    /// Creates or replaces the entity; `User:<id>` / `Group:<id>`.
    Entity(CorrelationKey),
    /// Member list of a group; `Members:Group:<id>`.
    Members(CorrelationKey),
    /// Operation derived from a queued event.
    Event(EventId),
}

impl fmt::Display for BulkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(key) => write!(f, "{key}"),
            Self::Members(key) => write!(f, "Members:{key}"),
            Self::Event(id) => write!(f, "Event:{id}"),
        }
    }
}

/// Target of an operation: a collection or one resource in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    pub kind: EntityKind,
    pub resource: Option<ResourceRef>,
}

impl ResourcePath {
    pub fn collection(kind: EntityKind) -> Self {
        Self {
            kind,
            resource: None,
        }
    }

    pub fn resource(kind: EntityKind, resource: ResourceRef) -> Self {
        Self {
            kind,
            resource: Some(resource),
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}/{}", self.kind.endpoint(), resource.as_wire()),
            None => f.write_str(self.kind.endpoint()),
        }
    }
}

/// One change inside a PatchOp.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchChange {
    Replace { path: String, value: Value },
    /// Like `Replace`, for values that must not appear in logs.
    ReplaceSecret { path: String, secret: Secret },
    AddMembers(Vec<ResourceRef>),
    RemoveMembers(Vec<ResourceRef>),
}

impl PatchChange {
    fn members_value(members: &[ResourceRef]) -> Value {
        Value::Array(
            members
                .iter()
                .map(|member| json!({ "value": member.as_wire() }))
                .collect(),
        )
    }

    pub fn to_patch_operation(&self) -> PatchOperation {
        match self {
            Self::Replace { path, value } => PatchOperation {
                op: PatchOpKind::Replace,
                path: Some(path.clone()),
                value: Some(value.clone()),
            },
            Self::ReplaceSecret { path, secret } => PatchOperation {
                op: PatchOpKind::Replace,
                path: Some(path.clone()),
                value: Some(Value::String(secret.expose().to_string())),
            },
            Self::AddMembers(members) => PatchOperation {
                op: PatchOpKind::Add,
                path: Some("members".to_string()),
                value: Some(Self::members_value(members)),
            },
            Self::RemoveMembers(members) => PatchOperation {
                op: PatchOpKind::Remove,
                path: Some("members".to_string()),
                value: Some(Self::members_value(members)),
            },
        }
    }

    fn references(&self) -> &[ResourceRef] {
        match self {
            Self::AddMembers(members) | Self::RemoveMembers(members) => members,
            Self::Replace { .. } | Self::ReplaceSecret { .. } => &[],
        }
    }

    fn references_mut(&mut self) -> &mut [ResourceRef] {
        match self {
            Self::AddMembers(members) | Self::RemoveMembers(members) => members,
            Self::Replace { .. } | Self::ReplaceSecret { .. } => &mut [],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationBody {
    /// Full resource representation for POST and PUT.
    Resource(Value),
    Patch(Vec<PatchChange>),
}

impl OperationBody {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Resource(value) => value.clone(),
            Self::Patch(changes) => {
                let request =
                    PatchRequest::new(changes.iter().map(PatchChange::to_patch_operation).collect());
                serde_json::to_value(request).unwrap_or(Value::Null)
            }
        }
    }
}

/// One unit of work destined for a target server.
#[derive(Debug, Clone, PartialEq)]
pub struct ScimOperation {
    pub method: ScimMethod,
    pub path: ResourcePath,
    pub body: Option<OperationBody>,
    pub bulk_id: BulkId,
}

impl ScimOperation {
    /// The entity this operation creates, if it is a creating POST.
    pub fn creates(&self) -> Option<&CorrelationKey> {
        match (&self.method, &self.bulk_id) {
            (ScimMethod::Post, BulkId::Entity(key)) => Some(key),
            _ => None,
        }
    }

    /// Keys this operation still refers to by forward reference.
    pub fn pending_references(&self) -> Vec<&CorrelationKey> {
        let path = self.path.resource.iter();
        let members = match &self.body {
            Some(OperationBody::Patch(changes)) => changes
                .iter()
                .flat_map(PatchChange::references)
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        };
        path.chain(members)
            .filter_map(ResourceRef::pending)
            .collect()
    }

    pub fn has_pending_references(&self) -> bool {
        !self.pending_references().is_empty()
    }

    /// Rewrite every pending reference the table can resolve.
    pub fn resolve_references(&mut self, ids: &IdTable) {
        if let Some(resource) = self.path.resource.as_mut() {
            resource.resolve(ids);
        }
        if let Some(OperationBody::Patch(changes)) = self.body.as_mut() {
            for change in changes.iter_mut() {
                for member in change.references_mut() {
                    member.resolve(ids);
                }
            }
        }
    }

    pub fn path_string(&self) -> String {
        self.path.to_string()
    }

    /// Wire body of the operation.
    pub fn data(&self) -> Option<Value> {
        self.body.as_ref().map(OperationBody::to_value)
    }

    pub fn to_bulk_operation(&self) -> BulkOperation {
        BulkOperation {
            method: self.method,
            path: self.path_string(),
            bulk_id: Some(self.bulk_id.to_string()),
            data: self.data(),
        }
    }

    pub fn to_request(&self) -> ScimRequest {
        let mut request = ScimRequest::new(self.method, self.path_string());
        request.body = self.data();
        request
    }
}
