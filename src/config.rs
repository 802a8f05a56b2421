//! Runtime configuration for the sync engine.
//!
//! A single [`SyncConfig`] is shared by the HTTP transport, the translator and
//! the orchestrator. Every field has a default, so hosts only override what
//! they need, either through the `with_*` builders or by deserializing JSON.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// User agent sent with every SCIM request.
pub const DEFAULT_USER_AGENT: &str = concat!("scim-sync/", env!("CARGO_PKG_VERSION"));

/// Placeholder email used when the source has none, since some servers require one.
pub const DEFAULT_PLACEHOLDER_EMAIL: &str = "change.me@example.com";

/// Configuration for transport, translation and scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// User agent header value for all outbound calls.
    pub user_agent: String,

    /// Content type for request bodies.
    pub content_type: String,

    /// Upper bound for a single HTTP call.
    #[serde(rename = "requestTimeoutMs", with = "duration_millis")]
    pub request_timeout: Duration,

    /// Upper bound for processing one server within a cycle. `None` disables it.
    #[serde(rename = "cycleDeadlineMs", with = "optional_duration_millis")]
    pub cycle_deadline: Option<Duration>,

    /// Interval between incremental update cycles.
    #[serde(rename = "updateIntervalMs", with = "duration_millis")]
    pub update_interval: Duration,

    /// Interval between sync request passes.
    #[serde(rename = "requestIntervalMs", with = "duration_millis")]
    pub request_interval: Duration,

    /// How many servers are processed concurrently within one cycle.
    pub max_concurrent_servers: usize,

    /// Email address sent for users that have none.
    pub placeholder_email: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            content_type: "application/scim+json".to_string(),
            request_timeout: Duration::from_secs(30),
            cycle_deadline: None,
            update_interval: Duration::from_secs(300),
            request_interval: Duration::from_secs(60),
            max_concurrent_servers: 4,
            placeholder_email: DEFAULT_PLACEHOLDER_EMAIL.to_string(),
        }
    }
}

impl SyncConfig {
    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the per-server deadline within one cycle.
    pub fn with_cycle_deadline(mut self, deadline: Duration) -> Self {
        self.cycle_deadline = Some(deadline);
        self
    }

    /// Set the incremental update interval.
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Set the sync request interval.
    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    /// Set how many servers may be processed at once. Zero is treated as one.
    pub fn with_max_concurrent_servers(mut self, limit: usize) -> Self {
        self.max_concurrent_servers = limit;
        self
    }

    /// Set the placeholder email for users without one.
    pub fn with_placeholder_email(mut self, email: impl Into<String>) -> Self {
        self.placeholder_email = email.into();
        self
    }

    /// Set the content type used for request bodies.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Effective server concurrency, never below one.
    pub fn server_concurrency(&self) -> usize {
        self.max_concurrent_servers.max(1)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|millis| millis.map(Duration::from_millis))
    }
}
