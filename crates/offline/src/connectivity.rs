//! Online/offline tracking.
//!
//! The monitor mirrors the platform's connectivity signal. Callers feed it
//! transitions with [`ConnectivityMonitor::go_online`] and
//! [`ConnectivityMonitor::go_offline`]; every real transition is broadcast as
//! a [`StatusChange`]. Repeating the current state is ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::cache::LAST_SEEN_KEY;
use crate::storage::{KeyValueStore, StorageError};
use crate::types::{ConnectionStatus, ConnectivityState, StatusChange};

const STATUS_CAPACITY: usize = 32;

/// Source of the platform connectivity signal.
pub trait NetworkProbe: Send + Sync {
    fn is_online(&self) -> bool;

    /// Effective connection type such as `"4g"`, when the platform reports one.
    fn connection_quality(&self) -> Option<String> {
        None
    }
}

/// Probe with a fixed answer, for hosts that push transitions explicitly.
#[derive(Debug, Clone)]
pub struct ManualProbe {
    online: bool,
    quality: Option<String>,
}

impl ManualProbe {
    pub fn online() -> Self {
        Self {
            online: true,
            quality: None,
        }
    }

    pub fn offline() -> Self {
        Self {
            online: false,
            quality: None,
        }
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }
}

impl NetworkProbe for ManualProbe {
    fn is_online(&self) -> bool {
        self.online
    }

    fn connection_quality(&self) -> Option<String> {
        self.quality.clone()
    }
}

pub struct ConnectivityMonitor {
    online: AtomicBool,
    probe: Arc<dyn NetworkProbe>,
    store: Arc<dyn KeyValueStore>,
    changes: broadcast::Sender<StatusChange>,
}

impl ConnectivityMonitor {
    /// Start from the probe's current answer.
    pub fn new(probe: Arc<dyn NetworkProbe>, store: Arc<dyn KeyValueStore>) -> Self {
        let online = probe.is_online();
        let (changes, _) = broadcast::channel(STATUS_CAPACITY);
        tracing::info!(online, "connectivity monitor started");
        Self {
            online: AtomicBool::new(online),
            probe,
            store,
            changes,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectivityState {
        ConnectivityState::from_online(self.is_online())
    }

    /// Record that the platform came online. Returns `true` on a transition.
    pub fn go_online(&self) -> bool {
        self.transition(true)
    }

    /// Record that the platform went offline. Returns `true` on a transition.
    pub fn go_offline(&self) -> bool {
        self.transition(false)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    fn transition(&self, online: bool) -> bool {
        if self.online.swap(online, Ordering::SeqCst) == online {
            return false;
        }

        let change = StatusChange {
            state: ConnectivityState::from_online(online),
            at: Utc::now(),
        };
        if online {
            tracing::info!("Device is online");
        } else {
            tracing::info!("Device is offline");
        }
        let _ = self.changes.send(change);
        true
    }

    /// Stamp the current time as the last moment the client was active.
    pub async fn record_last_seen(&self) -> Result<DateTime<Utc>, StorageError> {
        let now = Utc::now();
        self.store.set(LAST_SEEN_KEY, &now.to_rfc3339()).await?;
        Ok(now)
    }

    /// Last stamped activity. Unreadable values count as never seen.
    pub async fn last_seen(&self) -> Option<DateTime<Utc>> {
        match self.store.get(LAST_SEEN_KEY).await {
            Ok(Some(raw)) => DateTime::parse_from_rfc3339(&raw)
                .map(|at| at.with_timezone(&Utc))
                .ok(),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read last-seen timestamp");
                None
            }
        }
    }

    /// Snapshot for status displays.
    pub async fn status(&self, pending_actions: usize) -> ConnectionStatus {
        ConnectionStatus {
            is_online: self.is_online(),
            connection_quality: self
                .probe
                .connection_quality()
                .unwrap_or_else(|| "unknown".to_string()),
            last_seen: self.last_seen().await,
            pending_actions,
        }
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}
