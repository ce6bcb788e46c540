//! Sleek Sync - offline mutation queue for the Sleek Coach client
//!
//! Records check-ins and nutrition edits made while the device is offline,
//! flushes them to the API once connectivity returns, and tells the UI which
//! cached reads to refresh.
//!
//! # Architecture
//!
//! - **Store** ([`PendingMutationStore`]): ordered per-domain queues, sync
//!   status and a bounded error log, persisted as one JSON document through a
//!   [`KeyValueStore`] after every change
//! - **Orchestrator** ([`SyncOrchestrator`]): debounced triggers, eligibility
//!   re-check, at most one pass in flight
//! - **Ports**: [`RemoteMutationClient`], [`CacheInvalidator`],
//!   [`ConnectivityProvider`], [`AppLifecycleProvider`]
//!
//! # Example
//!
//! ```rust,ignore
//! use sleek_sync::*;
//!
//! let kv = Arc::new(FileKvStore::open("/data/sleek").await?);
//! let store = Arc::new(PendingMutationStore::load(kv, StoreOptions::default()).await?);
//!
//! let orchestrator = SyncOrchestrator::new(
//!     store.clone(),
//!     Arc::new(HttpMutationClient::new(&config.remote)?),
//!     Arc::new(BroadcastInvalidator::default()),
//!     connectivity,
//!     OrchestratorSettings::default(),
//! );
//! let _triggers = orchestrator.start(Some(lifecycle));
//!
//! // Write path: queue unconditionally, the orchestrator flushes it
//! store.enqueue(CheckinPayload::new(date).with_weight(81.5)).await?;
//! orchestrator.sync_now();
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod persistence;
pub mod remote;
pub mod store;
pub mod triggers;
pub mod types;

pub use cache::{BroadcastInvalidator, CacheInvalidator, InvalidationRequest, RefetchScope};
pub use config::{Config, ExhaustionPolicy, FailurePolicy, StorageBackend};
pub use error::{RemoteError, RemoteErrorKind, Result, SyncError};
pub use orchestrator::{
    DebounceTimer, OrchestratorSettings, PassOutcome, PassReport, SkipReason, SyncOrchestrator,
    SyncTrigger, TriggerHandle,
};
pub use persistence::{FileKvStore, KeyValueStore, MemoryKvStore, SqliteKvStore};
pub use remote::{HttpMutationClient, RemoteMutationClient};
pub use store::{FailureOutcome, PendingMutationStore, StoreOptions};
pub use triggers::{
    AppLifecycleProvider, AppState, ChannelConnectivity, ChannelLifecycle, ConnectivityProvider,
    HttpConnectivityProbe, NetworkState,
};
pub use types::{
    CheckinPayload, DeadLetter, Domain, MutationPayload, NutritionDayPayload, PendingMutation,
    SyncIndicator, SyncStatus,
};
