//! `engage360-offline`
//!
//! **Responsibility:** keep member-facing writes working without a network.
//!
//! This crate provides:
//! - A persisted mutation queue that replays offline writes in order
//! - Connectivity tracking with transition notifications
//! - An expiring key/value cache for read data and form drafts
//! - Dispatch of queued actions onto the document store and email service
//! - A background sync worker and the runtime that owns all of the above

pub mod action_queue;
pub mod backend;
pub mod cache;
pub mod config;
pub mod connectivity;
#[cfg(feature = "http")]
pub mod http;
pub mod runtime;
pub mod storage;
pub mod sync_worker;
pub mod types;

pub use action_queue::MutationQueue;
pub use backend::{
    ActionExecutor, BackendDispatcher, BackendError, BackingStore, Document, EmailService, Fields,
    InMemoryDocumentStore, InMemoryEmailOutbox,
};
pub use cache::{CacheError, OfflineCache, StorageUsage, format_bytes};
pub use config::{ConfigError, OfflineConfig};
pub use connectivity::{ConnectivityMonitor, ManualProbe, NetworkProbe};
#[cfg(feature = "http")]
pub use http::HttpBackend;
pub use runtime::{InitError, InitReport, OfflineDeps, OfflineRuntime, Submission, WarmupOutcome};
pub use storage::{InMemoryStore, KeyValueStore, SqliteStore, StorageError};
pub use sync_worker::SyncWorker;
pub use types::{
    AccountStatus, BookingStatus, BookingUpdate, ConnectionStatus, ConnectivityState,
    EmailCampaign, NewBooking, OfflineAction, ProfileUpdate, QueueEvent, QueueStatus,
    QueuedAction, ReplayOutcome, ReplayReport, StatusChange,
};
