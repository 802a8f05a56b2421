//! Translation of identity events and directory entries into SCIM operations.
//!
//! Each event yields zero or one [`ScimOperation`] per target server. Ids of
//! referenced users and groups come from the cycle's [`IdTable`], which queries
//! the server by `externalId` the first time a key is needed. Entities the
//! server does not know are referenced by forward `bulkId` so a create earlier
//! in the same batch can satisfy them.

pub mod operation;
pub mod resolver;

pub use crate::protocol::EntityKind;
pub use operation::{
    BulkId, CorrelationKey, OperationBody, PatchChange, ResourcePath, ResourceRef, ScimOperation,
};
pub use resolver::IdTable;

use crate::config::SyncConfig;
use crate::directory::{LocalGroup, LocalUser};
use crate::event::{EventKind, IdentityEvent};
use crate::protocol::ScimMethod;
use crate::server::TargetServer;
use crate::transport::Transport;
use log::warn;
use serde_json::{Value, json};
use std::fmt;

/// Why an event produced no operation. The event still counts as handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnrecognizedEvent { tag: String },
    UnsupportedAttribute { kind: EntityKind, attribute: String },
    MissingSubject { event: String, subject: EntityKind },
    MissingValue { attribute: String },
    InvalidValue { attribute: String, value: String },
    MissingSecret,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnrecognizedEvent { tag } => write!(f, "unknown event '{tag}'"),
            Self::UnsupportedAttribute { kind, attribute } => {
                write!(f, "{kind} attribute '{attribute}' is not synchronized")
            }
            Self::MissingSubject { event, subject } => {
                write!(f, "{event} has no {} id", subject.label().to_lowercase())
            }
            Self::MissingValue { attribute } => write!(f, "no new value for '{attribute}'"),
            Self::InvalidValue { attribute, value } => {
                write!(f, "'{value}' is not a valid value for '{attribute}'")
            }
            Self::MissingSecret => f.write_str("password event carries no secret"),
        }
    }
}

/// Result of translating one event for one server.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Operation(ScimOperation),
    Skip(SkipReason),
}

impl Translation {
    pub fn operation(self) -> Option<ScimOperation> {
        match self {
            Self::Operation(operation) => Some(operation),
            Self::Skip(_) => None,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

/// Source user attribute name → SCIM attribute path.
fn user_attribute_path(attribute: &str) -> Option<&'static str> {
    match attribute {
        "active" => Some("active"),
        "displayName" => Some("name.formatted"),
        "eMailAddress" => Some("emails.value"),
        _ => None,
    }
}

fn active_value(value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" | "" => Some(false),
        _ => None,
    }
}

/// Maps events and directory entries onto SCIM operations.
#[derive(Debug, Clone)]
pub struct OperationTranslator {
    placeholder_email: String,
}

impl OperationTranslator {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            placeholder_email: config.placeholder_email.clone(),
        }
    }

    /// Why this event can never produce an operation, independent of any server.
    pub fn skip_reason(&self, event: &IdentityEvent) -> Option<SkipReason> {
        let kind = &event.kind;
        if let EventKind::Unrecognized(tag) = kind {
            return Some(SkipReason::UnrecognizedEvent { tag: tag.clone() });
        }
        if kind.references_user() && event.user_id.is_none() {
            return Some(SkipReason::MissingSubject {
                event: kind.to_string(),
                subject: EntityKind::User,
            });
        }
        if kind.references_group() && event.group_id.is_none() {
            return Some(SkipReason::MissingSubject {
                event: kind.to_string(),
                subject: EntityKind::Group,
            });
        }

        let attribute = event.attribute.as_deref().unwrap_or_default();
        match kind {
            EventKind::UserChanged if user_attribute_path(attribute).is_none() => {
                Some(SkipReason::UnsupportedAttribute {
                    kind: EntityKind::User,
                    attribute: attribute.to_string(),
                })
            }
            EventKind::GroupChanged if attribute != "displayName" => {
                Some(SkipReason::UnsupportedAttribute {
                    kind: EntityKind::Group,
                    attribute: attribute.to_string(),
                })
            }
            EventKind::UserChanged | EventKind::GroupChanged if event.new_value.is_none() => {
                Some(SkipReason::MissingValue {
                    attribute: attribute.to_string(),
                })
            }
            EventKind::UserChanged if attribute == "active" => event
                .new_value
                .as_deref()
                .filter(|value| active_value(value).is_none())
                .map(|value| SkipReason::InvalidValue {
                    attribute: attribute.to_string(),
                    value: value.to_string(),
                }),
            EventKind::PasswordChanged
                if event.secret.as_ref().is_none_or(|secret| secret.is_empty()) =>
            {
                Some(SkipReason::MissingSecret)
            }
            _ => None,
        }
    }

    /// Translate one event for one server, resolving referenced ids as needed.
    pub async fn translate<T: Transport>(
        &self,
        event: &IdentityEvent,
        transport: &T,
        server: &TargetServer,
        ids: &mut IdTable,
    ) -> Translation {
        if let Some(reason) = self.skip_reason(event) {
            warn!("Skipping event {} ({}): {}", event.id, event.kind, reason);
            return Translation::Skip(reason);
        }

        let group = match (&event.group_id, event.kind.references_group()) {
            (Some(id), true) => Some(
                ids.resolve(transport, server, CorrelationKey::group(id.clone()))
                    .await,
            ),
            _ => None,
        };
        let user = match (&event.user_id, event.kind.references_user()) {
            (Some(id), true) => Some(
                ids.resolve(transport, server, CorrelationKey::user(id.clone()))
                    .await,
            ),
            _ => None,
        };

        self.build(event, user, group)
    }

    /// Build the operation for an event from already resolved references.
    pub fn build(
        &self,
        event: &IdentityEvent,
        user: Option<ResourceRef>,
        group: Option<ResourceRef>,
    ) -> Translation {
        if let Some(reason) = self.skip_reason(event) {
            return Translation::Skip(reason);
        }

        let missing = |subject| {
            Translation::Skip(SkipReason::MissingSubject {
                event: event.kind.to_string(),
                subject,
            })
        };
        let event_id = BulkId::Event(event.id);
        let value = event.new_value.clone().unwrap_or_default();

        let operation = match &event.kind {
            EventKind::UserCreated => {
                let Some(user) = user else {
                    return missing(EntityKind::User);
                };
                let local_id = event.user_id.as_deref().unwrap_or_default();
                let body = self.user_payload(local_id, local_id, None, true);
                Self::upsert(EntityKind::User, local_id, user, body, event_id)
            }
            EventKind::UserChanged => {
                let Some(user) = user else {
                    return missing(EntityKind::User);
                };
                let attribute = event.attribute.as_deref().unwrap_or_default();
                let path = user_attribute_path(attribute).unwrap_or(attribute);
                let value = if attribute == "active" {
                    Value::Bool(active_value(&value).unwrap_or_default())
                } else {
                    Value::String(value)
                };
                Self::patch(
                    EntityKind::User,
                    user,
                    vec![PatchChange::Replace {
                        path: path.to_string(),
                        value,
                    }],
                    event_id,
                )
            }
            EventKind::UserDeleted => {
                let Some(user) = user else {
                    return missing(EntityKind::User);
                };
                Self::delete(EntityKind::User, user, event_id)
            }
            EventKind::UserAddedToGroup | EventKind::UserRemovedFromGroup => {
                let Some(user) = user else {
                    return missing(EntityKind::User);
                };
                let Some(group) = group else {
                    return missing(EntityKind::Group);
                };
                let change = if event.kind == EventKind::UserAddedToGroup {
                    PatchChange::AddMembers(vec![user])
                } else {
                    PatchChange::RemoveMembers(vec![user])
                };
                Self::patch(EntityKind::Group, group, vec![change], event_id)
            }
            EventKind::GroupCreated => {
                let Some(group) = group else {
                    return missing(EntityKind::Group);
                };
                let local_id = event.group_id.as_deref().unwrap_or_default();
                let display_name = event.new_value.as_deref().unwrap_or(local_id);
                let body = Self::group_payload(local_id, display_name);
                Self::upsert(EntityKind::Group, local_id, group, body, event_id)
            }
            EventKind::GroupChanged => {
                let Some(group) = group else {
                    return missing(EntityKind::Group);
                };
                Self::patch(
                    EntityKind::Group,
                    group,
                    vec![PatchChange::Replace {
                        path: "displayName".to_string(),
                        value: Value::String(value),
                    }],
                    event_id,
                )
            }
            EventKind::GroupDeleted => {
                let Some(group) = group else {
                    return missing(EntityKind::Group);
                };
                Self::delete(EntityKind::Group, group, event_id)
            }
            EventKind::PasswordChanged => {
                let (Some(user), Some(secret)) = (user, event.secret.clone()) else {
                    return Translation::Skip(SkipReason::MissingSecret);
                };
                Self::patch(
                    EntityKind::User,
                    user,
                    vec![PatchChange::ReplaceSecret {
                        path: "password".to_string(),
                        secret,
                    }],
                    event_id,
                )
            }
            EventKind::Unrecognized(tag) => {
                return Translation::Skip(SkipReason::UnrecognizedEvent { tag: tag.clone() });
            }
        };

        Translation::Operation(operation)
    }

    /// Create-or-replace operation for a directory user.
    pub fn user_upsert(&self, user: &LocalUser, existing: ResourceRef) -> ScimOperation {
        let body = self.user_payload(
            &user.id,
            &user.display_name,
            user.email.as_deref(),
            user.enabled,
        );
        let bulk_id = BulkId::Entity(CorrelationKey::user(user.id.clone()));
        Self::upsert(EntityKind::User, &user.id, existing, body, bulk_id)
    }

    /// Create-or-replace operation for a directory group, without members.
    pub fn group_upsert(&self, group: &LocalGroup, existing: ResourceRef) -> ScimOperation {
        let body = Self::group_payload(&group.id, &group.display_name);
        let bulk_id = BulkId::Entity(CorrelationKey::group(group.id.clone()));
        Self::upsert(EntityKind::Group, &group.id, existing, body, bulk_id)
    }

    /// Patch adding every listed member to a group.
    pub fn members_patch(
        &self,
        group_id: &str,
        group: ResourceRef,
        members: Vec<ResourceRef>,
    ) -> ScimOperation {
        Self::patch(
            EntityKind::Group,
            group,
            vec![PatchChange::AddMembers(members)],
            BulkId::Members(CorrelationKey::group(group_id)),
        )
    }

    /// Core User representation. Servers that require an email get the placeholder.
    pub fn user_payload(
        &self,
        local_id: &str,
        display_name: &str,
        email: Option<&str>,
        active: bool,
    ) -> Value {
        let email = email
            .filter(|email| !email.is_empty())
            .unwrap_or(&self.placeholder_email);
        json!({
            "schemas": [EntityKind::User.schema()],
            "active": active,
            "externalId": local_id,
            "userName": local_id,
            "name": { "formatted": display_name },
            "emails": [{ "value": email }],
        })
    }

    pub fn group_payload(local_id: &str, display_name: &str) -> Value {
        json!({
            "schemas": [EntityKind::Group.schema()],
            "externalId": local_id,
            "displayName": display_name,
        })
    }

    /// PUT to a known resource, otherwise a creating POST keyed by the entity.
    fn upsert(
        kind: EntityKind,
        local_id: &str,
        existing: ResourceRef,
        body: Value,
        replace_id: BulkId,
    ) -> ScimOperation {
        match existing {
            ResourceRef::Resolved(id) => ScimOperation {
                method: ScimMethod::Put,
                path: ResourcePath::resource(kind, ResourceRef::Resolved(id)),
                body: Some(OperationBody::Resource(body)),
                bulk_id: replace_id,
            },
            ResourceRef::Pending(_) => ScimOperation {
                method: ScimMethod::Post,
                path: ResourcePath::collection(kind),
                body: Some(OperationBody::Resource(body)),
                bulk_id: BulkId::Entity(CorrelationKey::new(kind, local_id)),
            },
        }
    }

    fn patch(
        kind: EntityKind,
        target: ResourceRef,
        changes: Vec<PatchChange>,
        bulk_id: BulkId,
    ) -> ScimOperation {
        ScimOperation {
            method: ScimMethod::Patch,
            path: ResourcePath::resource(kind, target),
            body: Some(OperationBody::Patch(changes)),
            bulk_id,
        }
    }

    fn delete(kind: EntityKind, target: ResourceRef, bulk_id: BulkId) -> ScimOperation {
        ScimOperation {
            method: ScimMethod::Delete,
            path: ResourcePath::resource(kind, target),
            body: None,
            bulk_id,
        }
    }
}
