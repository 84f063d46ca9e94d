//! Application-scoped offline runtime.
//!
//! [`OfflineRuntime::initialize`] builds the queue, connectivity monitor and
//! cache, restores the persisted queue and warms the cache concurrently, then
//! starts the sync worker. Everything it owns is torn down by
//! [`OfflineRuntime::shutdown`] or on drop.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use engage360_core::ActionId;

use crate::action_queue::MutationQueue;
use crate::backend::{
    ActionExecutor, BackendDispatcher, BackendError, BackingStore, EmailService, PROGRAMS, USERS,
};
use crate::cache::OfflineCache;
use crate::config::{ConfigError, OfflineConfig};
use crate::connectivity::{ConnectivityMonitor, NetworkProbe};
use crate::storage::{KeyValueStore, SqliteStore, StorageError};
use crate::sync_worker::SyncWorker;
use crate::types::{ConnectionStatus, OfflineAction, ReplayOutcome};

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("offline storage unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("no platform data directory for the offline database; set ENGAGE360_OFFLINE_DB")]
    NoDataDir,
}

/// External collaborators of the runtime.
#[derive(Clone)]
pub struct OfflineDeps {
    pub storage: Arc<dyn KeyValueStore>,
    pub store: Arc<dyn BackingStore>,
    pub email: Arc<dyn EmailService>,
    pub probe: Arc<dyn NetworkProbe>,
}

impl OfflineDeps {
    /// Use the SQLite database named by `config` for local persistence.
    pub fn with_sqlite(
        config: &OfflineConfig,
        store: Arc<dyn BackingStore>,
        email: Arc<dyn EmailService>,
        probe: Arc<dyn NetworkProbe>,
    ) -> Result<Self, InitError> {
        let path = config.resolved_database_path().ok_or(InitError::NoDataDir)?;
        tracing::info!(path = %path.display(), "using offline database");
        Ok(Self {
            storage: Arc::new(SqliteStore::open(path)),
            store,
            email,
            probe,
        })
    }
}

/// Outcome of the initial cache warm-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmupOutcome {
    /// Started offline; nothing was fetched.
    Skipped,
    Cached { programs: usize, users: usize },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub restored_actions: usize,
    pub cache_warmup: WarmupOutcome,
}

/// What happened to a submitted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Executed against the backing services right away.
    Applied,
    /// Accepted for later replay.
    Queued(ActionId),
}

pub struct OfflineRuntime {
    config: OfflineConfig,
    queue: Arc<MutationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    cache: OfflineCache,
    executor: Arc<dyn ActionExecutor>,
    report: InitReport,
    shutdown: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineRuntime {
    /// Build and start the runtime.
    ///
    /// An invalid config or a storage failure while restoring the queue aborts
    /// initialization. A failed cache warm-up does not; it is reported in
    /// [`InitReport`].
    pub async fn initialize(config: OfflineConfig, deps: OfflineDeps) -> Result<Self, InitError> {
        tracing::info!("Initializing offline runtime");
        config.validate()?;

        let cache = OfflineCache::new(deps.storage.clone(), config.cache_ttl);
        let monitor = Arc::new(ConnectivityMonitor::new(deps.probe, deps.storage));
        let dispatcher = BackendDispatcher::new(deps.store, deps.email);
        let executor: Arc<dyn ActionExecutor> = Arc::new(dispatcher.clone());

        let (queue, cache_warmup) = tokio::try_join!(
            MutationQueue::load(cache.clone(), executor.clone(), config.max_retries),
            async {
                Ok::<_, StorageError>(
                    warm_up(&cache, dispatcher.store().as_ref(), monitor.is_online()).await,
                )
            },
        )?;
        let queue = Arc::new(queue);

        let report = InitReport {
            restored_actions: queue.len().await,
            cache_warmup,
        };
        if let WarmupOutcome::Failed(reason) = &report.cache_warmup {
            tracing::warn!(%reason, "initial cache warm-up failed");
        }

        let worker = SyncWorker::new(queue.clone(), monitor.clone(), &config);
        let shutdown = worker.shutdown_handle();
        let handle = worker.start();

        tracing::info!(
            restored_actions = report.restored_actions,
            online = monitor.is_online(),
            "Offline runtime initialized"
        );

        Ok(Self {
            config,
            queue,
            monitor,
            cache,
            executor,
            report,
            shutdown,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn cache(&self) -> &OfflineCache {
        &self.cache
    }

    pub fn report(&self) -> &InitReport {
        &self.report
    }

    /// Forward a platform connectivity signal. Returns `true` on a transition.
    pub fn set_online(&self, online: bool) -> bool {
        if online {
            self.monitor.go_online()
        } else {
            self.monitor.go_offline()
        }
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        self.monitor.status(self.queue.len().await).await
    }

    /// Apply `action` now if possible, otherwise queue it.
    ///
    /// Offline submissions and submissions that fail because the backing
    /// service is unreachable are queued. Any other backend error is returned
    /// since replaying the same request would not help.
    ///
    /// While older actions are still pending, `action` is queued behind them
    /// and a replay pass runs, so submissions reach the backend in order.
    pub async fn submit(&self, action: OfflineAction) -> Result<Submission, BackendError> {
        if !self.monitor.is_online() {
            return Ok(Submission::Queued(self.queue.enqueue(action).await));
        }

        if !self.queue.is_empty().await {
            let id = self.queue.enqueue(action).await;
            return Ok(match self.queue.replay_all().await {
                ReplayOutcome::Completed(report) if report.succeeded.contains(&id) => {
                    Submission::Applied
                }
                _ => Submission::Queued(id),
            });
        }

        match self.executor.execute(&action).await {
            Ok(()) => Ok(Submission::Applied),
            Err(err) if err.is_unavailable() => {
                tracing::warn!(kind = action.kind(), error = %err, "backend unreachable, queueing action");
                Ok(Submission::Queued(self.queue.enqueue(action).await))
            }
            Err(err) => Err(err),
        }
    }

    /// Stop the sync worker and wait for it to finish.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "sync worker ended abnormally");
            }
        }
    }
}

impl Drop for OfflineRuntime {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

async fn warm_up(cache: &OfflineCache, store: &dyn BackingStore, online: bool) -> WarmupOutcome {
    if !online {
        return WarmupOutcome::Skipped;
    }

    let (programs, users) = match tokio::try_join!(store.list(PROGRAMS), store.list(USERS)) {
        Ok(lists) => lists,
        Err(err) => return WarmupOutcome::Failed(err.to_string()),
    };

    let cached = tokio::try_join!(cache.cache_programs(&programs), cache.cache_users(&users));
    match cached {
        Ok(_) => {
            tracing::info!("Initial data cached successfully");
            WarmupOutcome::Cached {
                programs: programs.len(),
                users: users.len(),
            }
        }
        Err(err) => WarmupOutcome::Failed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BOOKINGS, InMemoryDocumentStore, InMemoryEmailOutbox, StoreOperation};
    use crate::connectivity::ManualProbe;
    use crate::storage::InMemoryStore;
    use crate::types::{BookingStatus, BookingUpdate};
    use engage360_core::BookingId;
    use serde_json::json;

    struct Fixture {
        storage: Arc<InMemoryStore>,
        store: Arc<InMemoryDocumentStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                storage: Arc::new(InMemoryStore::new()),
                store: Arc::new(InMemoryDocumentStore::new()),
            }
        }

        fn deps(&self, probe: ManualProbe) -> OfflineDeps {
            OfflineDeps {
                storage: self.storage.clone(),
                store: self.store.clone(),
                email: Arc::new(InMemoryEmailOutbox::new()),
                probe: Arc::new(probe),
            }
        }
    }

    fn fields(value: serde_json::Value) -> crate::backend::Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn cancel(id: &str) -> OfflineAction {
        OfflineAction::CancelBooking {
            booking_id: BookingId::new(id),
        }
    }

    #[tokio::test]
    async fn online_start_warms_the_cache() {
        let fx = Fixture::new();
        fx.store.insert(PROGRAMS, "yoga", fields(json!({"name": "Yoga"}))).await;

        let runtime = OfflineRuntime::initialize(OfflineConfig::default(), fx.deps(ManualProbe::online()))
            .await
            .unwrap();

        assert_eq!(
            runtime.report().cache_warmup,
            WarmupOutcome::Cached {
                programs: 1,
                users: 0
            }
        );
        let programs = runtime.cache().cached_programs().await.unwrap().unwrap();
        assert_eq!(programs[0].id, "yoga");
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn offline_start_skips_warm_up() {
        let fx = Fixture::new();
        let runtime = OfflineRuntime::initialize(OfflineConfig::default(), fx.deps(ManualProbe::offline()))
            .await
            .unwrap();

        assert_eq!(runtime.report().cache_warmup, WarmupOutcome::Skipped);
        assert!(fx.store.operations().await.is_empty());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn failed_warm_up_is_reported_not_fatal() {
        let fx = Fixture::new();
        fx.store.set_available(false);

        let runtime = OfflineRuntime::initialize(OfflineConfig::default(), fx.deps(ManualProbe::online()))
            .await
            .unwrap();

        assert!(matches!(runtime.report().cache_warmup, WarmupOutcome::Failed(_)));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn zero_sync_interval_is_rejected_at_initialization() {
        let fx = Fixture::new();
        let config = OfflineConfig::default().with_sync_interval(std::time::Duration::ZERO);

        let result = OfflineRuntime::initialize(config, fx.deps(ManualProbe::offline())).await;
        assert!(matches!(
            result,
            Err(InitError::Config(ConfigError::Zero {
                key: crate::config::SYNC_INTERVAL_ENV
            }))
        ));
    }

    #[tokio::test]
    async fn storage_failure_aborts_initialization() {
        let fx = Fixture::new();
        fx.storage.set_failing(true);

        let result =
            OfflineRuntime::initialize(OfflineConfig::default(), fx.deps(ManualProbe::offline())).await;
        assert!(matches!(result, Err(InitError::Storage(_))));
    }

    #[tokio::test]
    async fn submit_applies_immediately_when_online() {
        let fx = Fixture::new();
        fx.store.insert(BOOKINGS, "b1", fields(json!({"status": "pending"}))).await;
        let runtime = OfflineRuntime::initialize(OfflineConfig::default(), fx.deps(ManualProbe::online()))
            .await
            .unwrap();

        assert_eq!(runtime.submit(cancel("b1")).await.unwrap(), Submission::Applied);
        assert!(runtime.queue().is_empty().await);
        assert_eq!(
            fx.store.document(BOOKINGS, "b1").await,
            Some(fields(json!({"status": "cancelled"})))
        );
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn submit_queues_while_offline() {
        let fx = Fixture::new();
        let runtime = OfflineRuntime::initialize(OfflineConfig::default(), fx.deps(ManualProbe::offline()))
            .await
            .unwrap();

        let submission = runtime.submit(cancel("b1")).await.unwrap();
        assert!(matches!(submission, Submission::Queued(_)));
        assert_eq!(runtime.connection_status().await.pending_actions, 1);
        assert!(fx.store.operations().await.is_empty());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_backend_falls_back_to_the_queue() {
        let fx = Fixture::new();
        let runtime = OfflineRuntime::initialize(OfflineConfig::default(), fx.deps(ManualProbe::online()))
            .await
            .unwrap();
        fx.store.set_available(false);

        let submission = runtime.submit(cancel("b1")).await.unwrap();
        assert!(matches!(submission, Submission::Queued(_)));
        assert_eq!(runtime.queue().len().await, 1);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn online_submission_waits_behind_pending_actions() {
        let fx = Fixture::new();
        fx.store.insert(BOOKINGS, "b1", fields(json!({"status": "pending"}))).await;
        let runtime = OfflineRuntime::initialize(OfflineConfig::default(), fx.deps(ManualProbe::online()))
            .await
            .unwrap();

        fx.store.set_available(false);
        let confirm = OfflineAction::UpdateBooking {
            booking_id: BookingId::new("b1"),
            data: BookingUpdate::status(BookingStatus::Confirmed),
        };
        assert!(matches!(
            runtime.submit(confirm).await.unwrap(),
            Submission::Queued(_)
        ));

        fx.store.set_available(true);
        assert_eq!(runtime.submit(cancel("b1")).await.unwrap(), Submission::Applied);
        assert!(runtime.queue().is_empty().await);
        assert_eq!(
            fx.store.document(BOOKINGS, "b1").await,
            Some(fields(json!({"status": "cancelled"})))
        );
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn rejected_submissions_are_returned_not_queued() {
        let fx = Fixture::new();
        let runtime = OfflineRuntime::initialize(OfflineConfig::default(), fx.deps(ManualProbe::online()))
            .await
            .unwrap();

        let err = runtime.submit(cancel("missing")).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
        assert!(runtime.queue().is_empty().await);
        assert!(matches!(
            fx.store.operations().await.last(),
            Some(StoreOperation::Update { .. })
        ));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn restored_actions_are_counted() {
        let fx = Fixture::new();
        {
            let runtime =
                OfflineRuntime::initialize(OfflineConfig::default(), fx.deps(ManualProbe::offline()))
                    .await
                    .unwrap();
            runtime.submit(cancel("b1")).await.unwrap();
            runtime.submit(cancel("b2")).await.unwrap();
            runtime.shutdown().await;
        }

        let runtime = OfflineRuntime::initialize(OfflineConfig::default(), fx.deps(ManualProbe::offline()))
            .await
            .unwrap();
        assert_eq!(runtime.report().restored_actions, 2);
        runtime.shutdown().await;
    }
}
