//! Background replay of the mutation queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};

use crate::action_queue::MutationQueue;
use crate::config::OfflineConfig;
use crate::connectivity::ConnectivityMonitor;

/// `tokio::time::interval` rejects a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Drives replays from connectivity changes and a periodic timer.
///
/// - each offline → online transition triggers exactly one pass;
/// - every `sync_interval`, a pass runs if online and the queue is non-empty;
/// - every `last_seen_interval`, the last-seen timestamp is refreshed.
pub struct SyncWorker {
    queue: Arc<MutationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    sync_interval: Duration,
    last_seen_interval: Duration,
    shutdown: Arc<Notify>,
}

impl SyncWorker {
    pub fn new(
        queue: Arc<MutationQueue>,
        monitor: Arc<ConnectivityMonitor>,
        config: &OfflineConfig,
    ) -> Self {
        Self {
            queue,
            monitor,
            sync_interval: config.sync_interval.max(MIN_PERIOD),
            last_seen_interval: config.last_seen_interval.max(MIN_PERIOD),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Notifying this handle once stops the worker after its current step.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Spawn the worker onto the current tokio runtime.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        // Subscribe before spawning so no transition after `start` is missed.
        let mut changes = self.monitor.subscribe();

        tokio::spawn(async move {
            tracing::info!("Background sync worker started");

            let mut sync_interval =
                tokio::time::interval_at(Instant::now() + self.sync_interval, self.sync_interval);
            sync_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_seen_interval = tokio::time::interval_at(
                Instant::now() + self.last_seen_interval,
                self.last_seen_interval,
            );
            last_seen_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = self.shutdown.notified() => {
                        tracing::info!("Background sync worker received shutdown signal");
                        break;
                    }
                    change = changes.recv() => match change {
                        Ok(change) if change.state.is_online() => {
                            tracing::debug!("connectivity restored, replaying offline queue");
                            self.queue.replay_all().await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "missed connectivity changes");
                            if self.monitor.is_online() {
                                self.queue.replay_all().await;
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = sync_interval.tick() => {
                        if !self.monitor.is_online() {
                            tracing::debug!("Skipping sync - offline");
                            continue;
                        }
                        if self.queue.is_empty().await {
                            continue;
                        }
                        self.queue.replay_all().await;
                    }
                    _ = last_seen_interval.tick() => {
                        if let Err(err) = self.monitor.record_last_seen().await {
                            tracing::warn!(error = %err, "failed to update last-seen timestamp");
                        }
                    }
                }
            }

            tracing::info!("Background sync worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ActionExecutor, BackendError};
    use crate::cache::OfflineCache;
    use crate::connectivity::ManualProbe;
    use crate::storage::InMemoryStore;
    use crate::types::OfflineAction;
    use engage360_core::BookingId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ActionExecutor for CountingExecutor {
        async fn execute(&self, _action: &OfflineAction) -> Result<(), BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        queue: Arc<MutationQueue>,
        monitor: Arc<ConnectivityMonitor>,
        executor: Arc<CountingExecutor>,
    }

    async fn harness(probe: ManualProbe) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let executor = Arc::new(CountingExecutor::default());
        let cache = OfflineCache::new(store.clone(), Duration::from_secs(3600));
        let queue = Arc::new(MutationQueue::load(cache, executor.clone(), 3).await.unwrap());
        let monitor = Arc::new(ConnectivityMonitor::new(Arc::new(probe), store));
        Harness {
            queue,
            monitor,
            executor,
        }
    }

    fn config(sync: Duration, last_seen: Duration) -> OfflineConfig {
        OfflineConfig::default()
            .with_sync_interval(sync)
            .with_last_seen_interval(last_seen)
    }

    fn cancel(id: &str) -> OfflineAction {
        OfflineAction::CancelBooking {
            booking_id: BookingId::new(id),
        }
    }

    async fn wait_until_empty(queue: &MutationQueue) {
        for _ in 0..200 {
            if queue.is_empty().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue was not drained within timeout");
    }

    #[tokio::test]
    async fn coming_online_replays_the_queue() {
        let h = harness(ManualProbe::offline()).await;
        h.queue.enqueue(cancel("b1")).await;
        let hour = Duration::from_secs(3600);
        let worker = SyncWorker::new(h.queue.clone(), h.monitor.clone(), &config(hour, hour));
        let shutdown = worker.shutdown_handle();
        let handle = worker.start();

        h.monitor.go_online();
        wait_until_empty(&h.queue).await;
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 1);

        shutdown.notify_one();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn periodic_sync_replays_while_online() {
        let h = harness(ManualProbe::online()).await;
        let worker = SyncWorker::new(
            h.queue.clone(),
            h.monitor.clone(),
            &config(Duration::from_millis(20), Duration::from_secs(3600)),
        );
        let shutdown = worker.shutdown_handle();
        let handle = worker.start();

        h.queue.enqueue(cancel("b1")).await;
        wait_until_empty(&h.queue).await;

        shutdown.notify_one();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn periodic_sync_waits_while_offline() {
        let h = harness(ManualProbe::offline()).await;
        h.queue.enqueue(cancel("b1")).await;
        let worker = SyncWorker::new(
            h.queue.clone(),
            h.monitor.clone(),
            &config(Duration::from_millis(10), Duration::from_secs(3600)),
        );
        let shutdown = worker.shutdown_handle();
        let handle = worker.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.queue.len().await, 1);
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 0);

        shutdown.notify_one();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_records_last_seen() {
        let h = harness(ManualProbe::offline()).await;
        let worker = SyncWorker::new(
            h.queue.clone(),
            h.monitor.clone(),
            &config(Duration::from_secs(3600), Duration::from_millis(10)),
        );
        let shutdown = worker.shutdown_handle();
        let handle = worker.start();

        let mut seen = None;
        for _ in 0..200 {
            seen = h.monitor.last_seen().await;
            if seen.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen.is_some(), "last-seen was never recorded");

        shutdown.notify_one();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_periods_still_replay_on_reconnect() {
        let h = harness(ManualProbe::offline()).await;
        h.queue.enqueue(cancel("b1")).await;
        let worker = SyncWorker::new(
            h.queue.clone(),
            h.monitor.clone(),
            &config(Duration::ZERO, Duration::ZERO),
        );
        let shutdown = worker.shutdown_handle();
        let handle = worker.start();

        h.monitor.go_online();
        wait_until_empty(&h.queue).await;
        assert!(!handle.is_finished());

        shutdown.notify_one();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_before_the_first_tick_stops_the_worker() {
        let h = harness(ManualProbe::online()).await;
        let hour = Duration::from_secs(3600);
        let worker = SyncWorker::new(h.queue.clone(), h.monitor.clone(), &config(hour, hour));
        let shutdown = worker.shutdown_handle();
        let handle = worker.start();

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
