//! Shared fixtures for the sync engine integration tests.

#![allow(dead_code)]

pub mod fake_server;

use fake_server::FAKE_BASE;
use scim_sync::server::{Credential, NewServer};
use scim_sync::{InMemoryStore, ServerRegistry, SyncConfig, TargetServer};

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Insert a server straight into the registry, bypassing administration.
pub async fn register(store: &InMemoryStore, name: &str, url: &str) -> TargetServer {
    store
        .insert_server(NewServer::new(name, url, Credential::bearer(format!("{name}-token"))))
        .await
        .expect("server registration")
}

/// A standalone server record for tests that never touch the registry.
pub fn target(name: &str) -> TargetServer {
    TargetServer {
        id: scim_sync::ServerId(1),
        name: name.to_string(),
        base_url: FAKE_BASE.to_string(),
        credential: Credential::basic("sync:secret"),
        cached_capabilities: None,
    }
}

/// Configuration without scheduling noise.
pub fn config() -> SyncConfig {
    SyncConfig::default()
}
