//! reqwest-backed [`Transport`].

use super::{ScimRequest, ScimResponse, Transport, TransportError, TransportResult};
use crate::config::SyncConfig;
use crate::error::ConfigurationError;
use crate::protocol::ScimMethod;
use crate::server::TargetServer;
use log::{debug, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Method};
use serde_json::Value;

impl From<ScimMethod> for Method {
    fn from(method: ScimMethod) -> Self {
        match method {
            ScimMethod::Get => Method::GET,
            ScimMethod::Post => Method::POST,
            ScimMethod::Put => Method::PUT,
            ScimMethod::Patch => Method::PATCH,
            ScimMethod::Delete => Method::DELETE,
        }
    }
}

/// HTTP transport sharing one connection pool across all servers.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    content_type: String,
}

impl HttpTransport {
    /// Build a transport with the configured timeout and user agent.
    pub fn new(config: &SyncConfig) -> Result<Self, ConfigurationError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigurationError::HttpClient {
                message: e.to_string(),
            })?;

        Ok(Self::with_client(client, config))
    }

    /// Use a pre-built client.
    pub fn with_client(client: Client, config: &SyncConfig) -> Self {
        Self {
            client,
            content_type: config.content_type.clone(),
        }
    }

    async fn read_body(response: reqwest::Response) -> TransportResult<Option<Value>> {
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| TransportError::decode(e.to_string()))
    }
}

impl Transport for HttpTransport {
    async fn execute(
        &self,
        server: &TargetServer,
        request: ScimRequest,
    ) -> TransportResult<ScimResponse> {
        let url = server.endpoint(&request.path);
        let method = request.method;

        let mut builder = self
            .client
            .request(method.into(), &url)
            .header(AUTHORIZATION, server.credential.authorization_header())
            .header(ACCEPT, self.content_type.as_str());

        if method == ScimMethod::Get && !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, self.content_type.as_str())
                .body(serde_json::to_vec(body).map_err(|e| TransportError::decode(e.to_string()))?);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    "SCIM {} {} failed for server '{}' (credential {}): {}",
                    method,
                    url,
                    server.name,
                    server.credential.fingerprint(),
                    e
                );
                return Err(e.into());
            }
        };

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if status >= 400 {
            let body = Self::read_body(response).await.ok().flatten();
            warn!(
                "SCIM {} {} returned {} from server '{}' (credential {})",
                method,
                url,
                status,
                server.name,
                server.credential.fingerprint()
            );
            return Err(TransportError::status(status, body));
        }

        // Callers that need a document get a decode error from `ScimResponse::json`.
        let body = match Self::read_body(response).await {
            Ok(body) => body,
            Err(TransportError::Decode { message }) => {
                debug!(
                    "SCIM {} {} returned {} with a non-JSON body: {}",
                    method, url, status, message
                );
                None
            }
            Err(e) => return Err(e),
        };
        debug!("SCIM {} {} returned {}", method, url, status);

        Ok(ScimResponse {
            status,
            body,
            location,
        })
    }
}
