//! Authenticated request/response exchange with one SCIM server.
//!
//! [`Transport`] is the seam between sync logic and the network. The engine
//! ships [`HttpTransport`] (reqwest); tests substitute an in-process fake.
//! A transport never retries: every failure is classified and returned to the
//! caller, and the next sync cycle is the retry.

pub mod errors;
pub mod http;
pub mod lookup;

pub use errors::TransportError;
pub use http::HttpTransport;
pub use lookup::{find_resource_id, service_provider_config};

use crate::protocol::ScimMethod;
use crate::server::TargetServer;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;

pub type TransportResult<T> = Result<T, TransportError>;

/// A request relative to a server's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ScimRequest {
    pub method: ScimMethod,
    /// Path beginning with `/`, e.g. `/Users/42`.
    pub path: String,
    /// Query parameters, only sent with GET.
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ScimRequest {
    pub fn new(method: ScimMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(ScimMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(ScimMethod::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(ScimMethod::Put, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(ScimMethod::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(ScimMethod::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A successful (status < 400) response.
#[derive(Debug, Clone, PartialEq)]
pub struct ScimResponse {
    pub status: u16,
    /// Parsed JSON body; `None` for empty bodies such as `204 No Content`.
    pub body: Option<Value>,
    /// `Location` header, if present.
    pub location: Option<String>,
}

impl ScimResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self {
            status,
            body,
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Deserialize the body into a typed document.
    pub fn json<T: DeserializeOwned>(&self) -> TransportResult<T> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| TransportError::decode("response body is empty"))?;
        serde_json::from_value(body).map_err(|e| TransportError::decode(e.to_string()))
    }

    /// Server id of the created or returned resource.
    pub fn resource_id(&self) -> Option<String> {
        self.body
            .as_ref()
            .and_then(|body| body.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                self.location
                    .as_deref()
                    .and_then(crate::protocol::resource_id_from_location)
            })
    }
}

/// Executes SCIM requests against a registered server.
pub trait Transport: Send + Sync {
    /// Send one request, authenticating with the server's credential.
    ///
    /// Statuses of 400 and above are returned as [`TransportError::Status`].
    fn execute(
        &self,
        server: &TargetServer,
        request: ScimRequest,
    ) -> impl Future<Output = TransportResult<ScimResponse>> + Send;

    /// Send a request given a method name. Unknown methods fail with
    /// [`TransportError::BadMethod`] before any network activity.
    fn send(
        &self,
        server: &TargetServer,
        path: &str,
        body: Option<Value>,
        method: &str,
    ) -> impl Future<Output = TransportResult<ScimResponse>> + Send {
        let parsed = method.parse::<ScimMethod>();
        let path = path.to_string();
        async move {
            let mut request = ScimRequest::new(parsed?, path);
            request.body = body;
            self.execute(server, request).await
        }
    }
}
