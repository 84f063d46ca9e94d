//! Persisted mutation queue.
//!
//! Actions attempted while offline are appended here and replayed front to
//! back once connectivity returns. The whole queue is written to local
//! storage after every enqueue and after every replay pass.
//!
//! An action leaves the queue when it succeeds or when its last allowed
//! attempt fails. Exhausted actions are not kept anywhere: they are returned
//! in that pass's [`ReplayReport::dropped`] and logged, nothing more.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use engage360_core::ActionId;
use tokio::sync::{Mutex, broadcast};

use crate::backend::ActionExecutor;
use crate::cache::{CacheError, OfflineCache, QUEUE_KEY};
use crate::storage::StorageError;
use crate::types::{
    OfflineAction, QueueEvent, QueueStatus, QueuedAction, QueuedActionSummary, ReplayOutcome,
    ReplayReport,
};

const EVENT_CAPACITY: usize = 64;

pub struct MutationQueue {
    entries: Mutex<Vec<QueuedAction>>,
    replaying: AtomicBool,
    cache: OfflineCache,
    executor: Arc<dyn ActionExecutor>,
    max_retries: u32,
    events: broadcast::Sender<QueueEvent>,
}

/// Clears the in-progress flag when a pass ends, however it ends.
struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Attempt {
    Succeeded,
    Retry(u32),
    Dropped,
}

impl MutationQueue {
    /// Restore the queue from local storage.
    ///
    /// A missing, expired or corrupt persisted value yields an empty queue.
    /// Individual entries that no longer decode are skipped. Only a failing
    /// storage read is an error.
    pub async fn load(
        cache: OfflineCache,
        executor: Arc<dyn ActionExecutor>,
        max_retries: u32,
    ) -> Result<Self, StorageError> {
        let raw: Vec<serde_json::Value> = cache.get(QUEUE_KEY).await?.unwrap_or_default();

        let mut entries = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<QueuedAction>(value) {
                Ok(entry) => entries.push(entry),
                Err(err) => tracing::warn!(error = %err, "discarding undecodable queued action"),
            }
        }

        if !entries.is_empty() {
            tracing::info!("Loaded {} items from offline queue", entries.len());
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            entries: Mutex::new(entries),
            replaying: AtomicBool::new(false),
            cache,
            executor,
            max_retries,
            events,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Append an action and persist the queue.
    ///
    /// A failed write is logged; the action stays queued in memory and is
    /// written again with the next save.
    pub async fn enqueue(&self, action: OfflineAction) -> ActionId {
        let entry = QueuedAction::new(action, self.max_retries);
        let id = entry.id;
        let kind = entry.action.kind();

        {
            let mut entries = self.entries.lock().await;
            entries.push(entry);
            if let Err(err) = self.persist(&entries).await {
                tracing::error!(action_id = %id, error = %err, "failed to persist offline queue");
            }
        }

        tracing::info!(action_id = %id, "Action added to offline queue: {}", kind);
        let _ = self.events.send(QueueEvent::Enqueued { id, kind });
        id
    }

    /// Run one pass over the queue.
    ///
    /// Actions are executed strictly in order, one at a time. Only actions
    /// present when the pass starts take part; anything enqueued meanwhile
    /// waits for the next pass. A call made while another pass is running
    /// returns [`ReplayOutcome::AlreadyRunning`] without touching the queue.
    pub async fn replay_all(&self) -> ReplayOutcome {
        if self
            .replaying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("replay already in progress");
            return ReplayOutcome::AlreadyRunning;
        }
        let _guard = ReplayGuard(&self.replaying);

        let pending = self.entries.lock().await.clone();
        if pending.is_empty() {
            return ReplayOutcome::Idle;
        }

        tracing::info!("Processing {} offline actions", pending.len());

        let mut report = ReplayReport::default();
        let mut attempts: HashMap<ActionId, Attempt> = HashMap::with_capacity(pending.len());

        for mut entry in pending {
            match self.executor.execute(&entry.action).await {
                Ok(()) => {
                    tracing::debug!(action_id = %entry.id, kind = entry.action.kind(), "replayed offline action");
                    report.succeeded.push(entry.id);
                    attempts.insert(entry.id, Attempt::Succeeded);
                }
                Err(err) => {
                    entry.retry_count += 1;
                    if entry.is_exhausted() {
                        tracing::warn!(
                            action_id = %entry.id,
                            kind = entry.action.kind(),
                            attempts = entry.retry_count,
                            error = %err,
                            "max retries reached, dropping offline action"
                        );
                        attempts.insert(entry.id, Attempt::Dropped);
                        report.dropped.push(entry);
                    } else {
                        tracing::warn!(
                            action_id = %entry.id,
                            kind = entry.action.kind(),
                            attempts = entry.retry_count,
                            error = %err,
                            "offline action failed, will retry"
                        );
                        attempts.insert(entry.id, Attempt::Retry(entry.retry_count));
                        report.retried.push(entry.id);
                    }
                }
            }
        }

        {
            let mut entries = self.entries.lock().await;
            entries.retain_mut(|entry| match attempts.get(&entry.id) {
                Some(Attempt::Succeeded) | Some(Attempt::Dropped) => false,
                Some(Attempt::Retry(count)) => {
                    entry.retry_count = *count;
                    true
                }
                None => true,
            });
            if let Err(err) = self.persist(&entries).await {
                tracing::error!(error = %err, "failed to persist offline queue after replay");
            }
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            retried = report.retried.len(),
            dropped = report.dropped.len(),
            "offline queue processing complete"
        );
        let _ = self.events.send(QueueEvent::ReplayFinished(report.clone()));
        ReplayOutcome::Completed(report)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Queued actions in replay order.
    pub async fn snapshot(&self) -> Vec<QueuedAction> {
        self.entries.lock().await.clone()
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> QueueStatus {
        let entries = self.entries.lock().await;
        QueueStatus {
            total_actions: entries.len(),
            actions: entries
                .iter()
                .map(|entry| QueuedActionSummary {
                    id: entry.id,
                    kind: entry.action.kind(),
                    enqueued_at: entry.enqueued_at,
                    retries: entry.retry_count,
                })
                .collect(),
            sync_in_progress: self.is_replaying(),
        }
    }

    /// Discard every queued action.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        self.persist(&entries).await?;
        tracing::info!("Offline queue cleared");
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    async fn persist(&self, entries: &[QueuedAction]) -> Result<(), CacheError> {
        self.cache.put(QUEUE_KEY, entries, None).await
    }
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue")
            .field("max_retries", &self.max_retries)
            .field("replaying", &self.is_replaying())
            .finish_non_exhaustive()
    }
}
