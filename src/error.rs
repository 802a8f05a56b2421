//! Error types for SCIM sync operations.
//!
//! Failures are local to one (event, server) or (operation, chunk) pair and are
//! normally recorded as outcomes rather than raised. The types here cover the
//! cases that do surface to callers: bad registration input, store failures and
//! transport failures outside of a dispatch pass.

use crate::storage::StoreError;
use crate::transport::TransportError;

/// Main error type for sync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Invalid server registration or client configuration
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// HTTP call to a SCIM server failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Event queue, server registry or sync request store failure
    #[error("Store error: {0}")]
    Store(StoreError),

    /// No registered server matches the given id or name
    #[error("SCIM server not found: {0}")]
    ServerNotFound(String),

    /// The source directory could not be read
    #[error("Directory error: {0}")]
    Directory(String),

    /// Processing one server took longer than the configured cycle deadline
    #[error("Cycle deadline exceeded for SCIM server '{0}'")]
    DeadlineExceeded(String),
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised while validating a server registration.
///
/// These are surfaced immediately to the registration caller and never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Server name is empty or whitespace
    #[error("Server name cannot be empty")]
    EmptyName,

    /// Server URL does not use http or https
    #[error("Server URL must start with `http://` or `https://`, got '{url}'")]
    InvalidUrlScheme { url: String },

    /// Server URL has nothing after the scheme
    #[error("Server URL '{url}' has no host")]
    MissingHost { url: String },

    /// Another server already uses this name
    #[error("A SCIM server named '{name}' is already registered")]
    DuplicateName { name: String },

    /// Another server already uses this base URL
    #[error("A SCIM server with URL '{url}' is already registered")]
    DuplicateUrl { url: String },

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {message}")]
    HttpClient { message: String },
}

impl ConfigurationError {
    /// Create an invalid scheme error for the given URL.
    pub fn invalid_scheme(url: impl Into<String>) -> Self {
        Self::InvalidUrlScheme { url: url.into() }
    }
}

impl From<StoreError> for SyncError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Duplicate { field, value } if field == "url" => {
                Self::Configuration(ConfigurationError::DuplicateUrl { url: value })
            }
            StoreError::Duplicate { field, value } if field == "name" => {
                Self::Configuration(ConfigurationError::DuplicateName { name: value })
            }
            other => Self::Store(other),
        }
    }
}
