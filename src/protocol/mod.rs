//! SCIM 2.0 wire types used by the client side of the protocol.
//!
//! Only the message shapes this engine sends or reads are modelled: bulk
//! envelopes, patch requests, list responses and the service provider
//! configuration. Resource bodies stay as [`serde_json::Value`].

use crate::transport::TransportError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const USER_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:User";
pub const GROUP_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";
pub const SERVICE_PROVIDER_CONFIG_SCHEMA: &str =
    "urn:ietf:params:scim:schemas:core:2.0:ServiceProviderConfig";
pub const BULK_REQUEST_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:BulkRequest";
pub const BULK_RESPONSE_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:BulkResponse";
pub const PATCH_OP_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";
pub const LIST_RESPONSE_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";
pub const ERROR_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:Error";

/// The two SCIM resource types this engine provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Group,
}

impl EntityKind {
    /// Collection endpoint, e.g. `/Users`.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::User => "/Users",
            Self::Group => "/Groups",
        }
    }

    /// Label used in bulk ids and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Group => "Group",
        }
    }

    /// Core schema URN of resources of this kind.
    pub fn schema(&self) -> &'static str {
        match self {
            Self::User => USER_SCHEMA,
            Self::Group => GROUP_SCHEMA,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// HTTP methods permitted by the SCIM transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScimMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl ScimMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl FromStr for ScimMethod {
    type Err = TransportError;

    fn from_str(method: &str) -> Result<Self, Self::Err> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(TransportError::BadMethod {
                method: method.to_string(),
            }),
        }
    }
}

impl fmt::Display for ScimMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Supported {
    #[serde(default)]
    pub supported: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSupport {
    #[serde(default)]
    pub supported: bool,
    #[serde(default)]
    pub max_operations: i64,
    #[serde(default)]
    pub max_payload_size: i64,
}

/// The subset of `/ServiceProviderConfig` the engine reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProviderConfig {
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub patch: Supported,
    #[serde(default)]
    pub bulk: BulkSupport,
    #[serde(default)]
    pub filter: Supported,
}

impl ServiceProviderConfig {
    /// Whether the first schema URN identifies a genuine config document.
    pub fn has_schema_marker(&self) -> bool {
        self.schemas.first().map(String::as_str) == Some(SERVICE_PROVIDER_CONFIG_SCHEMA)
    }
}

/// One entry of a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperation {
    pub method: ScimMethod,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub schemas: Vec<String>,
    #[serde(rename = "Operations")]
    pub operations: Vec<BulkOperation>,
}

impl BulkRequest {
    pub fn new(operations: Vec<BulkOperation>) -> Self {
        Self {
            schemas: vec![BULK_REQUEST_SCHEMA.to_string()],
            operations,
        }
    }
}

/// One entry of a bulk response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationResponse {
    #[serde(default)]
    pub bulk_id: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(deserialize_with = "status_code")]
    pub status: u16,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub response: Option<Value>,
}

impl BulkOperationResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server id of the affected resource, from `location` or the echoed body.
    pub fn resource_id(&self) -> Option<String> {
        self.location
            .as_deref()
            .and_then(resource_id_from_location)
            .or_else(|| {
                self.response
                    .as_ref()
                    .and_then(|body| body.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(rename = "Operations", default)]
    pub operations: Vec<BulkOperationResponse>,
}

impl BulkResponse {
    /// Whether the envelope carries the bulk response schema marker.
    pub fn is_well_formed(&self) -> bool {
        self.schemas.iter().any(|schema| schema == BULK_RESPONSE_SCHEMA)
    }
}

/// Bulk responses carry `status` as a string per RFC 7644; some servers send a number.
fn status_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Status {
        Number(u16),
        Text(String),
    }

    match Status::deserialize(deserializer)? {
        Status::Number(code) => Ok(code),
        Status::Text(text) => text
            .trim()
            .get(..3)
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid status '{text}'"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOpKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub schemas: Vec<String>,
    #[serde(rename = "Operations")]
    pub operations: Vec<PatchOperation>,
}

impl PatchRequest {
    pub fn new(operations: Vec<PatchOperation>) -> Self {
        Self {
            schemas: vec![PATCH_OP_SCHEMA.to_string()],
            operations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    #[serde(default)]
    pub total_results: u64,
    #[serde(rename = "Resources", default)]
    pub resources: Vec<Value>,
}

/// Extract the trailing resource id from a `.../Users/<id>` or `.../Groups/<id>` location.
pub fn resource_id_from_location(location: &str) -> Option<String> {
    let trimmed = location.trim_end_matches('/');
    let (collection, id) = trimmed.rsplit_once('/')?;
    let collection = collection.rsplit('/').next()?;
    if !matches!(collection, "Users" | "Groups") {
        return None;
    }
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then(|| id.to_string())
}

/// Escape a value for use inside a double-quoted SCIM filter literal.
pub fn escape_filter_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Filter matching resources whose `externalId` equals `external_id`.
pub fn external_id_filter(external_id: &str) -> String {
    format!("externalId eq \"{}\"", escape_filter_value(external_id))
}
