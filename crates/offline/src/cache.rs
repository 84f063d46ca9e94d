//! Expiring offline cache over a [`KeyValueStore`].
//!
//! Every value is stored inside an envelope
//! `{"data": …, "timestamp": "<rfc3339>", "expiry": <epoch ms>}`. Reads past
//! the expiry remove the entry. Reads of entries that do not decode are
//! treated as misses.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{Document, Fields};
use crate::storage::{KeyValueStore, StorageError};

pub const KEY_PREFIX: &str = "engage360_";
pub const QUEUE_KEY: &str = "engage360_offline_queue";
pub const PROGRAMS_KEY: &str = "engage360_programs";
pub const USER_DATA_KEY: &str = "engage360_user_data";
pub const BOOKINGS_KEY: &str = "engage360_bookings";
pub const LAST_SEEN_KEY: &str = "engage360_last_seen";
pub const SEARCH_HISTORY_KEY: &str = "engage360_search_history";
pub const ANALYTICS_KEY: &str = "engage360_analytics";

/// Form drafts outlive ordinary cache entries.
pub const FORM_DATA_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const SEARCH_HISTORY_LIMIT: usize = 50;
pub const ANALYTICS_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to encode cache entry {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T: ?Sized> {
    data: &'a T,
    timestamp: DateTime<Utc>,
    expiry: i64,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    expiry: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub query: String,
    /// Number of results the search returned.
    pub results: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUsage {
    pub size: u64,
    pub size_formatted: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub total: u64,
    pub total_formatted: String,
    pub breakdown: BTreeMap<String, KeyUsage>,
}

#[derive(Clone)]
pub struct OfflineCache {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
}

impl std::fmt::Debug for OfflineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineCache")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl OfflineCache {
    pub fn new(store: Arc<dyn KeyValueStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store `value` under `key`, expiring after `ttl` (or the default TTL).
    pub async fn put<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let now = Utc::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let envelope = EnvelopeRef {
            data: value,
            timestamp: now,
            expiry: now.timestamp_millis().saturating_add(ttl_ms),
        };
        let encoded = serde_json::to_string(&envelope).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;

        self.store.set(key, &encoded).await?;
        tracing::debug!(key, bytes = encoded.len(), "cached entry");
        Ok(())
    }

    /// Read `key`. Missing, expired and undecodable entries are all `None`.
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>, StorageError>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };

        let envelope: Envelope<T> = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(key, error = %err, "ignoring undecodable cache entry");
                return Ok(None);
            }
        };

        if Utc::now().timestamp_millis() > envelope.expiry {
            tracing::debug!(key, "cache entry expired");
            self.store.remove(key).await?;
            return Ok(None);
        }

        Ok(Some(envelope.data))
    }

    pub async fn cache_programs(&self, programs: &[Document]) -> Result<(), CacheError> {
        self.put(PROGRAMS_KEY, programs, None).await
    }

    pub async fn cached_programs(&self) -> Result<Option<Vec<Document>>, StorageError> {
        self.get(PROGRAMS_KEY).await
    }

    pub async fn cache_users(&self, users: &[Document]) -> Result<(), CacheError> {
        self.put(USER_DATA_KEY, users, None).await
    }

    pub async fn cached_users(&self) -> Result<Option<Vec<Document>>, StorageError> {
        self.get(USER_DATA_KEY).await
    }

    pub async fn cache_bookings(&self, bookings: &[Document]) -> Result<(), CacheError> {
        self.put(BOOKINGS_KEY, bookings, None).await
    }

    pub async fn cached_bookings(&self) -> Result<Option<Vec<Document>>, StorageError> {
        self.get(BOOKINGS_KEY).await
    }

    pub async fn store_preferences(
        &self,
        user_id: &str,
        preferences: &serde_json::Value,
    ) -> Result<(), CacheError> {
        self.put(&preferences_key(user_id), preferences, None).await
    }

    pub async fn preferences(&self, user_id: &str) -> Result<Option<serde_json::Value>, StorageError> {
        self.get(&preferences_key(user_id)).await
    }

    /// Save a form draft; drafts are kept for seven days.
    pub async fn store_form_data(
        &self,
        form_id: &str,
        data: &serde_json::Value,
    ) -> Result<(), CacheError> {
        self.put(&form_key(form_id), data, Some(FORM_DATA_TTL)).await
    }

    pub async fn form_data(&self, form_id: &str) -> Result<Option<serde_json::Value>, StorageError> {
        self.get(&form_key(form_id)).await
    }

    /// Prepend a search to the history, keeping the newest 50.
    pub async fn record_search(&self, query: &str, results: usize) -> Result<(), CacheError> {
        let mut history = self.search_history().await?;
        history.insert(
            0,
            SearchEntry {
                query: query.to_string(),
                results,
                timestamp: Utc::now(),
            },
        );
        history.truncate(SEARCH_HISTORY_LIMIT);
        self.put(SEARCH_HISTORY_KEY, &history, None).await
    }

    /// Newest first.
    pub async fn search_history(&self) -> Result<Vec<SearchEntry>, StorageError> {
        Ok(self.get(SEARCH_HISTORY_KEY).await?.unwrap_or_default())
    }

    /// Append an analytics event stamped with the current time, keeping the
    /// newest 100. A `timestamp` field in `event` is overwritten.
    pub async fn record_analytics(&self, mut event: Fields) -> Result<(), CacheError> {
        let mut events = self.analytics().await?;
        event.insert(
            "timestamp".to_string(),
            serde_json::Value::String(Utc::now().to_rfc3339()),
        );
        events.push(event);
        if events.len() > ANALYTICS_LIMIT {
            events.drain(..events.len() - ANALYTICS_LIMIT);
        }
        self.put(ANALYTICS_KEY, &events, None).await
    }

    /// Oldest first.
    pub async fn analytics(&self) -> Result<Vec<Fields>, StorageError> {
        Ok(self.get(ANALYTICS_KEY).await?.unwrap_or_default())
    }

    /// Remove every `engage360_` key, including the persisted queue.
    pub async fn clear_all(&self) -> Result<usize, StorageError> {
        let keys = self.owned_keys().await?;
        for key in &keys {
            self.store.remove(key).await?;
        }
        tracing::info!(removed = keys.len(), "cleared offline cache");
        Ok(keys.len())
    }

    pub async fn storage_usage(&self) -> Result<StorageUsage, StorageError> {
        let mut breakdown = BTreeMap::new();
        let mut total = 0u64;

        for key in self.owned_keys().await? {
            if let Some(value) = self.store.get(&key).await? {
                let size = value.len() as u64;
                total += size;
                breakdown.insert(
                    key,
                    KeyUsage {
                        size,
                        size_formatted: format_bytes(size),
                    },
                );
            }
        }

        Ok(StorageUsage {
            total,
            total_formatted: format_bytes(total),
            breakdown,
        })
    }

    async fn owned_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .store
            .keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(KEY_PREFIX))
            .collect())
    }
}

pub fn preferences_key(user_id: &str) -> String {
    format!("{KEY_PREFIX}preferences_{user_id}")
}

pub fn form_key(form_id: &str) -> String {
    format!("{KEY_PREFIX}form_{form_id}")
}

/// Human-readable size in base 1024, at most two decimals: `0 Bytes`, `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut scaled = bytes as f64;
    while scaled >= 1024.0 && unit < UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{scaled:.2}");
    let formatted = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{formatted} {}", UNITS[unit])
}
