//! Role-assignment store seam (the `adminRoles` collection of the backing store).

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

/// Explicit per-email admin assignments.
#[async_trait]
pub trait RoleAssignmentStore: Send + Sync {
    /// Look up the admin flag recorded for `email`.
    ///
    /// `Ok(None)` means no record exists for that address.
    async fn admin_flag(&self, email: &str) -> Result<Option<bool>, RoleStoreError>;

    /// Create or update the record for `email`.
    async fn set_admin_flag(&self, email: &str, is_admin: bool) -> Result<(), RoleStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoleStoreError {
    #[error("role store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed role record for '{email}': {reason}")]
    Malformed { email: String, reason: String },
}

/// In-memory role store for tests/dev.
///
/// Can be switched to "unreachable" to simulate read failures.
#[derive(Debug)]
pub struct InMemoryRoleStore {
    records: RwLock<HashMap<String, bool>>,
    reachable: AtomicBool,
    lookups: AtomicUsize,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn with_record(self, email: impl Into<String>, is_admin: bool) -> Self {
        if let Ok(mut records) = self.records.write() {
            records.insert(email.into(), is_admin);
        }
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of `admin_flag` calls served (including failed ones).
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn ensure_reachable(&self) -> Result<(), RoleStoreError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RoleStoreError::Unavailable("simulated outage".to_string()))
        }
    }
}

impl Default for InMemoryRoleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoleAssignmentStore for InMemoryRoleStore {
    async fn admin_flag(&self, email: &str) -> Result<Option<bool>, RoleStoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()?;
        let records = self
            .records
            .read()
            .map_err(|_| RoleStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(records.get(email).copied())
    }

    async fn set_admin_flag(&self, email: &str, is_admin: bool) -> Result<(), RoleStoreError> {
        self.ensure_reachable()?;
        let mut records = self
            .records
            .write()
            .map_err(|_| RoleStoreError::Unavailable("lock poisoned".to_string()))?;
        records.insert(email.to_string(), is_admin);
        Ok(())
    }
}
