//! One-way SCIM 2.0 provisioning engine.
//!
//! Accumulates identity change events from a source-of-truth identity system,
//! translates them into SCIM protocol operations and pushes them to every
//! registered SCIM server, batching through `/Bulk` where the server allows it.
//!
//! # Core Components
//!
//! - [`SyncOrchestrator`] - Periodic driver: incremental updates, full resyncs, sync requests
//! - [`OperationTranslator`] - Maps one [`IdentityEvent`] onto zero or one [`ScimOperation`]
//! - [`BulkDispatcher`] - Capability-aware batching and outcome correlation
//! - [`Transport`] - Authenticated HTTP calls with classified failures
//! - [`storage`] - Event queue, server registry and sync request stores
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use scim_sync::{
//!     HttpTransport, InMemoryDirectory, InMemoryStore, ServerAdministration, SyncConfig,
//!     SyncOrchestrator,
//! };
//! use scim_sync::server::{Credential, NewServer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::default();
//! let store = InMemoryStore::new();
//! let transport = HttpTransport::new(&config)?;
//!
//! let admin = ServerAdministration::new(store.clone(), transport.clone());
//! admin
//!     .register(NewServer::new(
//!         "corp-idp",
//!         "https://scim.example.com/v2/",
//!         Credential::bearer("token"),
//!     ))
//!     .await?;
//!
//! let orchestrator =
//!     SyncOrchestrator::new(store, InMemoryDirectory::new(), transport, config);
//! let report = orchestrator.process_sync_requests().await?;
//! println!("{} succeeded, {} failed", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod transport;
pub mod translator;
pub mod worker;

pub use admin::ServerAdministration;
pub use config::SyncConfig;
pub use directory::{Directory, InMemoryDirectory, LocalGroup, LocalUser};
pub use dispatcher::{BulkDispatcher, DispatchReport, Outcome};
pub use error::{ConfigurationError, SyncError, SyncResult};
pub use event::{EventId, EventKind, IdentityEvent, Secret};
pub use orchestrator::{FullSyncReport, RequestsReport, SyncOrchestrator, UpdateReport};
pub use server::{ServerCapabilities, ServerId, ServerSummary, TargetServer};
pub use storage::{EventQueue, InMemoryStore, ServerRegistry, SyncRequest, SyncRequestStore};
pub use transport::{HttpTransport, ScimRequest, ScimResponse, Transport, TransportError};
pub use translator::{
    BulkId, CorrelationKey, EntityKind, IdTable, OperationTranslator, ResourceRef, ScimOperation,
    Translation,
};
pub use worker::SyncWorker;
