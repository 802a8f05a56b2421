//! Identity change events awaiting propagation.
//!
//! An [`IdentityEvent`] is created by the host's identity-change listener and
//! queued until every registered SCIM server has applied it. Event kinds are a
//! closed enum; tags produced by a newer event source that this crate does not
//! know about are kept as [`EventKind::Unrecognized`] so they can be logged and
//! dropped instead of failing deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque unique identifier of a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a new random event id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The kind of identity change an event describes.
///
/// Serialized as the tag the identity system emits (`UserCreatedEvent`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    UserCreated,
    UserChanged,
    UserDeleted,
    UserAddedToGroup,
    UserRemovedFromGroup,
    GroupCreated,
    GroupChanged,
    GroupDeleted,
    PasswordChanged,
    /// A tag this version does not handle; kept verbatim for logging.
    Unrecognized(String),
}

impl EventKind {
    /// Parse a tag emitted by the identity system.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "UserCreatedEvent" => Self::UserCreated,
            "UserChangedEvent" => Self::UserChanged,
            "UserDeletedEvent" => Self::UserDeleted,
            "UserAddedEvent" => Self::UserAddedToGroup,
            "UserRemovedEvent" => Self::UserRemovedFromGroup,
            "GroupCreatedEvent" => Self::GroupCreated,
            "GroupChangedEvent" => Self::GroupChanged,
            "GroupDeletedEvent" => Self::GroupDeleted,
            "PasswordUpdatedEvent" => Self::PasswordChanged,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// The tag this kind is stored and logged as.
    pub fn tag(&self) -> &str {
        match self {
            Self::UserCreated => "UserCreatedEvent",
            Self::UserChanged => "UserChangedEvent",
            Self::UserDeleted => "UserDeletedEvent",
            Self::UserAddedToGroup => "UserAddedEvent",
            Self::UserRemovedFromGroup => "UserRemovedEvent",
            Self::GroupCreated => "GroupCreatedEvent",
            Self::GroupChanged => "GroupChangedEvent",
            Self::GroupDeleted => "GroupDeletedEvent",
            Self::PasswordChanged => "PasswordUpdatedEvent",
            Self::Unrecognized(tag) => tag,
        }
    }

    /// Whether this kind has a translation at all.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    /// Whether translating this kind needs the subject user.
    pub fn references_user(&self) -> bool {
        matches!(
            self,
            Self::UserCreated
                | Self::UserChanged
                | Self::UserDeleted
                | Self::UserAddedToGroup
                | Self::UserRemovedFromGroup
                | Self::PasswordChanged
        )
    }

    /// Whether translating this kind needs the subject group.
    pub fn references_group(&self) -> bool {
        matches!(
            self,
            Self::UserAddedToGroup
                | Self::UserRemovedFromGroup
                | Self::GroupCreated
                | Self::GroupChanged
                | Self::GroupDeleted
        )
    }
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.tag().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Sensitive value carried by an event, such as a new password.
///
/// Never serialized and never printed: both `Debug` and `Display` redact it.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a sensitive value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value. Callers must not log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// One observed identity change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityEvent {
    pub id: EventId,
    #[serde(rename = "event")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Which field changed, for the `*Changed` kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    #[serde(skip)]
    pub secret: Option<Secret>,
    pub created_at: DateTime<Utc>,
}

impl IdentityEvent {
    /// Create an event of the given kind with no subjects.
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: EventId::new(),
            kind,
            user_id: None,
            group_id: None,
            attribute: None,
            new_value: None,
            secret: None,
            created_at: Utc::now(),
        }
    }

    pub fn user_created(user_id: impl Into<String>) -> Self {
        Self::new(EventKind::UserCreated).with_user(user_id)
    }

    pub fn user_changed(
        user_id: impl Into<String>,
        attribute: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        Self::new(EventKind::UserChanged)
            .with_user(user_id)
            .with_change(attribute, new_value)
    }

    pub fn user_deleted(user_id: impl Into<String>) -> Self {
        Self::new(EventKind::UserDeleted).with_user(user_id)
    }

    pub fn user_added_to_group(user_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self::new(EventKind::UserAddedToGroup)
            .with_user(user_id)
            .with_group(group_id)
    }

    pub fn user_removed_from_group(
        user_id: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self::new(EventKind::UserRemovedFromGroup)
            .with_user(user_id)
            .with_group(group_id)
    }

    pub fn group_created(group_id: impl Into<String>) -> Self {
        Self::new(EventKind::GroupCreated).with_group(group_id)
    }

    pub fn group_changed(
        group_id: impl Into<String>,
        attribute: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        Self::new(EventKind::GroupChanged)
            .with_group(group_id)
            .with_change(attribute, new_value)
    }

    pub fn group_deleted(group_id: impl Into<String>) -> Self {
        Self::new(EventKind::GroupDeleted).with_group(group_id)
    }

    pub fn password_changed(user_id: impl Into<String>, password: Secret) -> Self {
        Self::new(EventKind::PasswordChanged)
            .with_user(user_id)
            .with_secret(password)
    }

    /// Set the subject user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the subject group.
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the changed attribute and its new value.
    pub fn with_change(mut self, attribute: impl Into<String>, new_value: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self.new_value = Some(new_value.into());
        self
    }

    /// Set only the new value, e.g. a display name for a created group.
    pub fn with_value(mut self, new_value: impl Into<String>) -> Self {
        self.new_value = Some(new_value.into());
        self
    }

    /// Attach a sensitive payload.
    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secret = Some(secret);
        self
    }
}
