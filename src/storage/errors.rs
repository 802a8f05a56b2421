//! Store-level error types.
//!
//! These errors describe failures of the event queue, server registry and sync
//! request stores. They carry no knowledge of SCIM or of individual servers'
//! HTTP behaviour.

use std::fmt;

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum StoreError {
    /// The requested record does not exist.
    NotFound { entity: String, id: String },

    /// A uniqueness constraint was violated.
    Duplicate { field: String, value: String },

    /// A record could not be encoded or decoded.
    Serialization(serde_json::Error),

    /// The backing store cannot serve requests right now.
    Unavailable { message: String },
}

impl StoreError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Duplicate {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Whether retrying later may succeed.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { entity, id } => write!(f, "{} not found: {}", entity, id),
            StoreError::Duplicate { field, value } => {
                write!(f, "Duplicate {}: '{}' is already in use", field, value)
            }
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::Unavailable { message } => write!(f, "Store unavailable: {}", message),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error)
    }
}
