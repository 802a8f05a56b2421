//! In-process SCIM service provider standing in for real target servers.
//!
//! Implements just enough of RFC 7644 for the sync engine: capability
//! discovery, `externalId` filters, CRUD on `/Users` and `/Groups`, member
//! patches and `/Bulk` with `bulkId` reference resolution.

use scim_sync::protocol::{
    BULK_RESPONSE_SCHEMA, ERROR_SCHEMA, LIST_RESPONSE_SCHEMA, SERVICE_PROVIDER_CONFIG_SCHEMA,
    ScimMethod,
};
use scim_sync::transport::TransportResult;
use scim_sync::{ScimRequest, ScimResponse, TargetServer, Transport, TransportError};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

pub const FAKE_BASE: &str = "https://scim.test";

/// A request as received at the top level (bulk sub-operations are not logged).
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub method: ScimMethod,
    pub path: String,
    pub body: Option<Value>,
}

type Applied = Result<(u16, Option<Value>, Option<String>), (u16, String)>;

#[derive(Debug, Default)]
struct FakeState {
    bulk_max: Option<usize>,
    omit_config_marker: bool,
    malformed_bulk: bool,
    bulk_id_on_posts_only: bool,
    write_failure: Option<u16>,
    latency: Option<Duration>,
    next_id: u64,
    users: BTreeMap<String, Value>,
    groups: BTreeMap<String, Value>,
    created: usize,
    log: Vec<LoggedRequest>,
}

/// One fake SCIM server. Cloning shares state.
#[derive(Debug, Clone, Default)]
pub struct FakeScimServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeScimServer {
    /// A server advertising `/Bulk` with the given `maxOperations`.
    pub fn bulk(max_operations: usize) -> Self {
        let server = Self::default();
        server.state.try_lock().expect("fresh state").bulk_max = Some(max_operations);
        server
    }

    /// A server without bulk support.
    pub fn sequential() -> Self {
        Self::default()
    }

    /// Answer `/ServiceProviderConfig` without the schema URN.
    pub fn without_config_marker(self) -> Self {
        self.state.try_lock().expect("fresh state").omit_config_marker = true;
        self
    }

    /// Answer `/Bulk` with an envelope lacking the BulkResponse schema.
    pub fn with_malformed_bulk(self) -> Self {
        self.state.try_lock().expect("fresh state").malformed_bulk = true;
        self
    }

    /// Echo `bulkId` only in sub-responses to POST operations.
    pub fn echoing_bulk_id_on_posts_only(self) -> Self {
        self.state.try_lock().expect("fresh state").bulk_id_on_posts_only = true;
        self
    }

    /// Delay every request.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.try_lock().expect("fresh state").latency = Some(latency);
        self
    }

    /// Fail every write (and every `/Bulk` call) with `status`, or stop failing.
    pub async fn fail_writes_with(&self, status: Option<u16>) {
        self.state.lock().await.write_failure = status;
    }

    /// Create a user directly on the server, as if provisioned earlier.
    pub async fn seed_user(&self, external_id: &str) -> String {
        let mut state = self.state.lock().await;
        let body = json!({"externalId": external_id, "userName": external_id});
        match state.create("Users", body) {
            Ok((_, Some(body), _)) => body["id"].as_str().unwrap_or_default().to_string(),
            other => panic!("seeding failed: {other:?}"),
        }
    }

    pub async fn requests(&self) -> Vec<LoggedRequest> {
        self.state.lock().await.log.clone()
    }

    pub async fn count(&self, method: ScimMethod, path: &str) -> usize {
        self.state
            .lock()
            .await
            .log
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }

    /// Top-level requests other than GET.
    pub async fn writes(&self) -> usize {
        self.state
            .lock()
            .await
            .log
            .iter()
            .filter(|request| request.method != ScimMethod::Get)
            .count()
    }

    /// Resources created so far, including inside bulk requests.
    pub async fn created(&self) -> usize {
        self.state.lock().await.created
    }

    pub async fn user(&self, external_id: &str) -> Option<Value> {
        let state = self.state.lock().await;
        find_external(&state.users, external_id).cloned()
    }

    pub async fn group(&self, external_id: &str) -> Option<Value> {
        let state = self.state.lock().await;
        find_external(&state.groups, external_id).cloned()
    }

    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }

    pub async fn group_count(&self) -> usize {
        self.state.lock().await.groups.len()
    }

    /// External ids of the members of a group, sorted.
    pub async fn member_external_ids(&self, group_external_id: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let Some(group) = find_external(&state.groups, group_external_id) else {
            return Vec::new();
        };
        let mut members: Vec<String> = member_values(group)
            .iter()
            .filter_map(|id| state.users.get(id))
            .filter_map(|user| user["externalId"].as_str())
            .map(str::to_string)
            .collect();
        members.sort();
        members
    }
}

impl Transport for FakeScimServer {
    async fn execute(
        &self,
        _server: &TargetServer,
        request: ScimRequest,
    ) -> TransportResult<ScimResponse> {
        let latency = self.state.lock().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        state.log.push(LoggedRequest {
            method: request.method,
            path: request.path.clone(),
            body: request.body.clone(),
        });
        state.handle(request)
    }
}

/// Routes requests to fake servers by base URL.
#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    servers: Arc<RwLock<HashMap<String, FakeScimServer>>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, base_url: &str, server: FakeScimServer) {
        self.servers
            .write()
            .await
            .insert(base_url.trim_end_matches('/').to_string(), server);
    }
}

impl Transport for FakeNetwork {
    async fn execute(
        &self,
        server: &TargetServer,
        request: ScimRequest,
    ) -> TransportResult<ScimResponse> {
        let target = self.servers.read().await.get(&server.base_url).cloned();
        match target {
            Some(fake) => fake.execute(server, request).await,
            None => Err(TransportError::Network(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("nothing listening at {}", server.base_url),
            )))),
        }
    }
}

impl FakeState {
    fn handle(&mut self, request: ScimRequest) -> TransportResult<ScimResponse> {
        let ScimRequest {
            method,
            path,
            query,
            body,
        } = request;

        if method == ScimMethod::Get {
            return self.read(&path, &query);
        }
        if let Some(status) = self.write_failure {
            return Err(TransportError::status(status, Some(error_body(status, "injected failure"))));
        }
        if method == ScimMethod::Post && path == "/Bulk" {
            return match self.bulk(body.unwrap_or(Value::Null)) {
                Ok(response) => Ok(ScimResponse::new(200, Some(response))),
                Err((status, detail)) => {
                    Err(TransportError::status(status, Some(error_body(status, &detail))))
                }
            };
        }

        match self.apply(method, &path, body) {
            Ok((status, body, location)) => {
                let response = ScimResponse::new(status, body);
                Ok(match location {
                    Some(location) => response.with_location(location),
                    None => response,
                })
            }
            Err((status, detail)) => Err(TransportError::status(status, Some(error_body(status, &detail)))),
        }
    }

    fn read(&self, path: &str, query: &[(String, String)]) -> TransportResult<ScimResponse> {
        let resources = match path {
            "/ServiceProviderConfig" => return Ok(ScimResponse::new(200, Some(self.config()))),
            "/Users" => &self.users,
            "/Groups" => &self.groups,
            _ => return Err(TransportError::status(404, None)),
        };

        let wanted = query
            .iter()
            .find(|(key, _)| key == "filter")
            .and_then(|(_, filter)| filter_literal(filter));
        let matches: Vec<Value> = resources
            .values()
            .filter(|resource| match &wanted {
                Some(external_id) => resource["externalId"].as_str() == Some(external_id.as_str()),
                None => true,
            })
            .cloned()
            .collect();

        Ok(ScimResponse::new(
            200,
            Some(json!({
                "schemas": [LIST_RESPONSE_SCHEMA],
                "totalResults": matches.len(),
                "Resources": matches,
            })),
        ))
    }

    fn config(&self) -> Value {
        let schemas = if self.omit_config_marker {
            json!([])
        } else {
            json!([SERVICE_PROVIDER_CONFIG_SCHEMA])
        };
        json!({
            "schemas": schemas,
            "patch": {"supported": true},
            "bulk": {
                "supported": self.bulk_max.is_some(),
                "maxOperations": self.bulk_max.unwrap_or(0),
                "maxPayloadSize": 1048576
            },
            "filter": {"supported": true, "maxResults": 200}
        })
    }

    fn bulk(&mut self, request: Value) -> Result<Value, (u16, String)> {
        if self.malformed_bulk {
            return Ok(json!({"Operations": []}));
        }

        let operations = request["Operations"].as_array().cloned().unwrap_or_default();
        if let Some(max) = self.bulk_max {
            if operations.len() > max {
                return Err((413, format!("{} operations exceed maxOperations {max}", operations.len())));
            }
        }

        let mut created: HashMap<String, String> = HashMap::new();
        let mut responses = Vec::with_capacity(operations.len());

        for operation in operations {
            let bulk_id = operation["bulkId"].as_str().map(str::to_string);
            let method_name = operation["method"].as_str().unwrap_or_default().to_string();
            let result = resolve_bulk_references(&operation, &created).and_then(|(path, data)| {
                let method = method_name
                    .parse::<ScimMethod>()
                    .map_err(|e| (400, e.to_string()))?;
                self.apply(method, &path, data)
            });

            let echoed = bulk_id
                .clone()
                .filter(|_| !self.bulk_id_on_posts_only || method_name == "POST");
            let mut response = match result {
                Ok((status, body, location)) => {
                    if let (Some(bulk_id), Some(id)) = (
                        &bulk_id,
                        body.as_ref().and_then(|body| body["id"].as_str()),
                    ) {
                        if method_name == "POST" {
                            created.insert(bulk_id.clone(), id.to_string());
                        }
                    }
                    json!({
                        "bulkId": echoed,
                        "method": method_name,
                        "location": location,
                        "status": status.to_string(),
                    })
                }
                Err((status, detail)) => json!({
                    "bulkId": echoed,
                    "method": method_name,
                    "status": status.to_string(),
                    "response": error_body(status, &detail),
                }),
            };
            if response["bulkId"].is_null() {
                if let Some(fields) = response.as_object_mut() {
                    fields.remove("bulkId");
                }
            }
            responses.push(response);
        }

        Ok(json!({
            "schemas": [BULK_RESPONSE_SCHEMA],
            "Operations": responses,
        }))
    }

    fn apply(&mut self, method: ScimMethod, path: &str, body: Option<Value>) -> Applied {
        let (collection, id) = split_path(path)?;
        match (method, id) {
            (ScimMethod::Post, None) => self.create(collection, body.unwrap_or(Value::Null)),
            (ScimMethod::Put, Some(id)) => {
                let resources = self.collection(collection);
                let Some(existing) = resources.get_mut(&id) else {
                    return Err((404, format!("{collection}/{id} not found")));
                };
                let mut replacement = body.unwrap_or(Value::Null);
                replacement["id"] = json!(id);
                *existing = replacement.clone();
                Ok((200, Some(replacement), None))
            }
            (ScimMethod::Patch, Some(id)) => self.patch(collection, &id, body.unwrap_or(Value::Null)),
            (ScimMethod::Delete, Some(id)) => match self.collection(collection).remove(&id) {
                Some(_) => Ok((204, None, None)),
                None => Err((404, format!("{collection}/{id} not found"))),
            },
            _ => Err((405, format!("{method} not allowed on {path}"))),
        }
    }

    fn create(&mut self, collection: &str, mut body: Value) -> Applied {
        let external_id = body["externalId"].as_str().map(str::to_string);
        if let Some(external_id) = &external_id {
            if find_external(self.collection(collection), external_id).is_some() {
                return Err((409, format!("externalId {external_id} already exists")));
            }
        }

        self.next_id += 1;
        let prefix = if collection == "Users" { "u" } else { "g" };
        let id = format!("{prefix}-{}", self.next_id);
        body["id"] = json!(id);
        self.collection(collection).insert(id.clone(), body.clone());
        self.created += 1;

        Ok((201, Some(body), Some(format!("{FAKE_BASE}/{collection}/{id}"))))
    }

    fn patch(&mut self, collection: &str, id: &str, request: Value) -> Applied {
        let known_users: Vec<String> = self.users.keys().cloned().collect();
        let Some(resource) = self.collection(collection).get_mut(id) else {
            return Err((404, format!("{collection}/{id} not found")));
        };

        for operation in request["Operations"].as_array().cloned().unwrap_or_default() {
            let op = operation["op"].as_str().unwrap_or_default().to_ascii_lowercase();
            let path = operation["path"].as_str().unwrap_or_default().to_string();
            let value = operation["value"].clone();

            match (op.as_str(), path.as_str()) {
                ("add", "members") => {
                    let mut members = member_values(resource);
                    for member in value.as_array().cloned().unwrap_or_default() {
                        let member_id = member["value"].as_str().unwrap_or_default().to_string();
                        if !known_users.contains(&member_id) {
                            return Err((400, format!("unknown member {member_id}")));
                        }
                        if !members.contains(&member_id) {
                            members.push(member_id);
                        }
                    }
                    set_members(resource, &members);
                }
                ("remove", "members") => {
                    let removed: Vec<String> = value
                        .as_array()
                        .cloned()
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|member| member["value"].as_str().map(str::to_string))
                        .collect();
                    let members: Vec<String> = member_values(resource)
                        .into_iter()
                        .filter(|member| !removed.contains(member))
                        .collect();
                    set_members(resource, &members);
                }
                ("replace", path) if !path.is_empty() => {
                    resource[path] = value;
                }
                _ => return Err((400, format!("unsupported patch op {op} {path}"))),
            }
        }

        Ok((200, Some(resource.clone()), None))
    }

    fn collection(&mut self, collection: &str) -> &mut BTreeMap<String, Value> {
        if collection == "Users" {
            &mut self.users
        } else {
            &mut self.groups
        }
    }
}

fn split_path(path: &str) -> Result<(&'static str, Option<String>), (u16, String)> {
    let mut segments = path.trim_start_matches('/').splitn(2, '/');
    let collection = match segments.next() {
        Some("Users") => "Users",
        Some("Groups") => "Groups",
        _ => return Err((404, format!("no such endpoint {path}"))),
    };
    let id = segments.next().filter(|id| !id.is_empty()).map(str::to_string);
    if let Some(id) = &id {
        if id.starts_with("bulkId:") {
            return Err((400, format!("unresolved reference {id}")));
        }
    }
    Ok((collection, id))
}

/// Substitute `bulkId:<id>` references with ids created earlier in the request.
fn resolve_bulk_references(
    operation: &Value,
    created: &HashMap<String, String>,
) -> Result<(String, Option<Value>), (u16, String)> {
    let substitute = |text: &str| -> Result<String, (u16, String)> {
        match text.strip_prefix("bulkId:") {
            Some(reference) => created
                .get(reference)
                .cloned()
                .ok_or((409, format!("bulkId {reference} not created"))),
            None => Ok(text.to_string()),
        }
    };

    let path = operation["path"]
        .as_str()
        .unwrap_or_default()
        .split('/')
        .map(|segment| substitute(segment))
        .collect::<Result<Vec<_>, _>>()?
        .join("/");

    let data = match operation.get("data") {
        Some(data) if !data.is_null() => {
            let mut data = data.clone();
            substitute_strings(&mut data, &substitute)?;
            Some(data)
        }
        _ => None,
    };
    Ok((path, data))
}

fn substitute_strings<F>(value: &mut Value, substitute: &F) -> Result<(), (u16, String)>
where
    F: Fn(&str) -> Result<String, (u16, String)>,
{
    match value {
        Value::String(text) => *text = substitute(text)?,
        Value::Array(items) => {
            for item in items {
                substitute_strings(item, substitute)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_strings(item, substitute)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Extract the literal from `externalId eq "..."`.
fn filter_literal(filter: &str) -> Option<String> {
    let start = filter.find('"')?;
    let end = filter.rfind('"')?;
    (end > start).then(|| filter[start + 1..end].replace("\\\"", "\"").replace("\\\\", "\\"))
}

fn find_external<'a>(resources: &'a BTreeMap<String, Value>, external_id: &str) -> Option<&'a Value> {
    resources
        .values()
        .find(|resource| resource["externalId"].as_str() == Some(external_id))
}

fn member_values(resource: &Value) -> Vec<String> {
    resource["members"]
        .as_array()
        .map(|members| {
            members
                .iter()
                .filter_map(|member| member["value"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn set_members(resource: &mut Value, members: &[String]) {
    resource["members"] = Value::Array(members.iter().map(|id| json!({"value": id})).collect());
}

fn error_body(status: u16, detail: &str) -> Value {
    json!({
        "schemas": [ERROR_SCHEMA],
        "status": status.to_string(),
        "detail": detail,
    })
}
