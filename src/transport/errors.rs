//! Classified failures of a single SCIM HTTP call.

use serde_json::Value;

/// Errors returned by [`Transport`](super::Transport) implementations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The requested method is not one of GET, POST, PUT, PATCH or DELETE
    #[error("Unsupported HTTP method '{method}'")]
    BadMethod { method: String },

    /// The server answered with a status of 400 or above
    #[error("SCIM server responded with status {status}")]
    Status { status: u16, body: Option<Value> },

    /// Connection, TLS or timeout failure
    #[error("Network error: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A successful response carried a body that is not valid JSON
    #[error("Failed to decode response body: {message}")]
    Decode { message: String },

    /// The response was valid JSON but not the expected SCIM document
    #[error("Unexpected SCIM response: {message}")]
    Protocol { message: String },
}

impl TransportError {
    pub fn status(status: u16, body: Option<Value>) -> Self {
        Self::Status { status, body }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// HTTP status, when the server produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the server rejected the credential.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status_code(), Some(401 | 403))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::decode(error.to_string())
        } else {
            Self::Network(Box::new(error))
        }
    }
}
