//! Read-only helpers built on [`Transport`]: capability discovery and
//! `externalId` lookups.

use super::{ScimRequest, Transport, TransportError, TransportResult};
use crate::protocol::{EntityKind, ListResponse, ServiceProviderConfig, external_id_filter};
use crate::server::TargetServer;
use log::debug;
use serde_json::Value;

/// Fetch `/ServiceProviderConfig`, rejecting documents without the schema marker.
pub async fn service_provider_config<T: Transport>(
    transport: &T,
    server: &TargetServer,
) -> TransportResult<ServiceProviderConfig> {
    let response = transport
        .execute(server, ScimRequest::get("/ServiceProviderConfig"))
        .await?;
    let config: ServiceProviderConfig = response.json()?;

    if !config.has_schema_marker() {
        return Err(TransportError::protocol(format!(
            "server '{}' did not return a ServiceProviderConfig document",
            server.name
        )));
    }
    Ok(config)
}

/// Find the server-side id of the resource whose `externalId` is `external_id`.
pub async fn find_resource_id<T: Transport>(
    transport: &T,
    server: &TargetServer,
    kind: EntityKind,
    external_id: &str,
) -> TransportResult<Option<String>> {
    let request = ScimRequest::get(kind.endpoint())
        .with_query("filter", external_id_filter(external_id))
        .with_query("count", "1");
    let response = transport.execute(server, request).await?;
    let list: ListResponse = response.json()?;

    let id = list
        .resources
        .iter()
        .find_map(|resource| resource.get("id").and_then(Value::as_str))
        .map(str::to_string);

    debug!(
        "Lookup of {} '{}' on server '{}': {:?}",
        kind, external_id, server.name, id
    );
    Ok(id)
}
