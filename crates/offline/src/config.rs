//! Offline runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const MAX_RETRIES_ENV: &str = "ENGAGE360_MAX_RETRIES";
pub const SYNC_INTERVAL_ENV: &str = "ENGAGE360_SYNC_INTERVAL_SECS";
pub const LAST_SEEN_INTERVAL_ENV: &str = "ENGAGE360_LAST_SEEN_INTERVAL_SECS";
pub const CACHE_TTL_ENV: &str = "ENGAGE360_CACHE_TTL_SECS";
pub const DATABASE_PATH_ENV: &str = "ENGAGE360_OFFLINE_DB";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

/// Settings for the mutation queue, sync worker and cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineConfig {
    /// Attempts per queued action before it is dropped.
    pub max_retries: u32,
    /// Period of the background replay while online.
    pub sync_interval: Duration,
    /// Period of the last-seen heartbeat.
    pub last_seen_interval: Duration,
    /// Lifetime of cache entries written without an explicit TTL.
    pub cache_ttl: Duration,
    /// SQLite file backing local persistence. `None` uses the platform data dir.
    pub database_path: Option<PathBuf>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            sync_interval: Duration::from_secs(5 * 60),
            last_seen_interval: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            database_path: None,
        }
    }
}

impl OfflineConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_last_seen_interval(mut self, interval: Duration) -> Self {
        self.last_seen_interval = interval;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Read overrides from `ENGAGE360_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`OfflineConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(retries) = read_number(&lookup, MAX_RETRIES_ENV)? {
            if retries == 0 {
                return Err(ConfigError::Zero {
                    key: MAX_RETRIES_ENV,
                });
            }
            config.max_retries = u32::try_from(retries).map_err(|_| ConfigError::InvalidNumber {
                key: MAX_RETRIES_ENV,
                value: retries.to_string(),
            })?;
        }
        if let Some(secs) = read_seconds(&lookup, SYNC_INTERVAL_ENV)? {
            config.sync_interval = secs;
        }
        if let Some(secs) = read_seconds(&lookup, LAST_SEEN_INTERVAL_ENV)? {
            config.last_seen_interval = secs;
        }
        if let Some(secs) = read_seconds(&lookup, CACHE_TTL_ENV)? {
            config.cache_ttl = secs;
        }
        if let Some(path) = lookup(DATABASE_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(path.trim()));
        }

        Ok(config)
    }

    /// Reject values the runtime cannot run with: no retries, or a zero
    /// period for either timer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Zero {
                key: MAX_RETRIES_ENV,
            });
        }
        if self.sync_interval.is_zero() {
            return Err(ConfigError::Zero {
                key: SYNC_INTERVAL_ENV,
            });
        }
        if self.last_seen_interval.is_zero() {
            return Err(ConfigError::Zero {
                key: LAST_SEEN_INTERVAL_ENV,
            });
        }
        Ok(())
    }

    /// The configured database file, or the default under the platform data dir.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path.clone().or_else(default_database_path)
    }
}

/// `{data_dir}/engage360/offline.db`.
pub fn default_database_path() -> Option<PathBuf> {
    let mut path = dirs::data_dir()?;
    path.push("engage360");
    path.push("offline.db");
    Some(path)
}

fn read_number<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
    }
}

fn read_seconds<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match read_number(lookup, key)? {
        None => Ok(None),
        Some(0) => Err(ConfigError::Zero { key }),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
    }
}
