//! Registered SCIM target servers and their credentials.

use crate::error::ConfigurationError;
use crate::event::Secret;
use crate::protocol::ServiceProviderConfig;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Registry-assigned identifier of a target server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub u64);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How the credential is presented in the `Authorization` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// `Basic base64(secret)`; the secret is usually `user:password`.
    #[default]
    Basic,
    /// `Bearer secret`
    Bearer,
}

/// Decrypted server credential.
///
/// Encryption at rest belongs to the host; this type only guarantees the secret
/// never reaches a log line. Use [`Credential::fingerprint`] to correlate
/// credentials in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    scheme: AuthScheme,
    secret: Secret,
}

impl Credential {
    pub fn new(scheme: AuthScheme, secret: impl Into<String>) -> Self {
        Self {
            scheme,
            secret: Secret::new(secret),
        }
    }

    pub fn basic(secret: impl Into<String>) -> Self {
        Self::new(AuthScheme::Basic, secret)
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new(AuthScheme::Bearer, token)
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        match self.scheme {
            AuthScheme::Basic => format!("Basic {}", STANDARD.encode(self.secret.expose())),
            AuthScheme::Bearer => format!("Bearer {}", self.secret.expose()),
        }
    }

    /// Short SHA-256 prefix of the secret, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.secret.expose().as_bytes());
        digest
            .iter()
            .take(6)
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

/// Capability information discovered from `/ServiceProviderConfig`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    pub bulk_supported: bool,
    pub max_bulk_operations: usize,
    pub patch_supported: bool,
}

impl ServerCapabilities {
    /// Capabilities of a server that only accepts one operation per request.
    pub fn sequential() -> Self {
        Self {
            bulk_supported: false,
            max_bulk_operations: 0,
            patch_supported: true,
        }
    }

    /// Capabilities of a server accepting bulk requests of up to `max_operations`.
    pub fn bulk(max_operations: usize) -> Self {
        Self {
            bulk_supported: true,
            max_bulk_operations: max_operations,
            patch_supported: true,
        }
    }

    /// Chunk size for `/Bulk`, or `None` when bulk is unusable.
    pub fn bulk_limit(&self) -> Option<usize> {
        (self.bulk_supported && self.max_bulk_operations > 0).then_some(self.max_bulk_operations)
    }
}

impl From<&ServiceProviderConfig> for ServerCapabilities {
    fn from(config: &ServiceProviderConfig) -> Self {
        Self {
            bulk_supported: config.bulk.supported,
            max_bulk_operations: usize::try_from(config.bulk.max_operations).unwrap_or(0),
            patch_supported: config.patch.supported,
        }
    }
}

/// A registered SCIM endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetServer {
    pub id: ServerId,
    pub name: String,
    /// Normalized base URL without trailing slash.
    pub base_url: String,
    pub credential: Credential,
    pub cached_capabilities: Option<ServerCapabilities>,
}

impl TargetServer {
    /// Full URL for a resource path such as `/Users`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Validate and normalize a server base URL.
///
/// The URL must use `http://` or `https://`; trailing slashes are stripped.
pub fn normalize_base_url(url: &str) -> Result<String, ConfigurationError> {
    let url = url.trim();
    let Some(rest) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    else {
        return Err(ConfigurationError::invalid_scheme(url));
    };

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(ConfigurationError::MissingHost {
            url: url.to_string(),
        });
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn validate_name(name: &str) -> Result<String, ConfigurationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigurationError::EmptyName);
    }
    Ok(name.to_string())
}

/// Registration input for a new server.
#[derive(Debug, Clone, PartialEq)]
pub struct NewServer {
    pub name: String,
    pub url: String,
    pub credential: Credential,
}

impl NewServer {
    pub fn new(name: impl Into<String>, url: impl Into<String>, credential: Credential) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            credential,
        }
    }

    /// Check name and URL, returning the normalized registration.
    pub fn validate(self) -> Result<Self, ConfigurationError> {
        Ok(Self {
            name: validate_name(&self.name)?,
            url: normalize_base_url(&self.url)?,
            credential: self.credential,
        })
    }
}

/// Partial update of a registered server. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub credential: Option<Credential>,
}

impl ServerUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Apply the update to a server, validating changed fields.
    pub fn apply_to(self, mut server: TargetServer) -> Result<TargetServer, ConfigurationError> {
        if let Some(name) = self.name {
            server.name = validate_name(&name)?;
        }
        if let Some(url) = self.url {
            server.base_url = normalize_base_url(&url)?;
        }
        if let Some(credential) = self.credential {
            server.credential = credential;
        }
        Ok(server)
    }
}

/// Display form of a server with the credential masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSummary {
    pub id: ServerId,
    pub name: String,
    pub base_url: String,
    pub auth_scheme: AuthScheme,
    pub credential_fingerprint: String,
    pub capabilities: Option<ServerCapabilities>,
}

impl From<&TargetServer> for ServerSummary {
    fn from(server: &TargetServer) -> Self {
        Self {
            id: server.id,
            name: server.name.clone(),
            base_url: server.base_url.clone(),
            auth_scheme: server.credential.scheme(),
            credential_fingerprint: server.credential.fingerprint(),
            capabilities: server.cached_capabilities,
        }
    }
}
