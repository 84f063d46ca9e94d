//! Strongly-typed identifiers.
//!
//! Documents in the backing store are keyed by opaque strings the store
//! assigns, so document ids are string newtypes. Queue entries are created
//! locally and use time-ordered UUIDs instead.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a queued offline action.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7, so ids sort in creation order.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Map an id written by an older client onto an `ActionId`.
    ///
    /// UUID strings are kept as they are. Anything else (the old clients used
    /// short base36 ids) becomes a name-based UUIDv5, so the same string always
    /// maps to the same id.
    pub fn from_legacy(raw: &str) -> Self {
        match Uuid::from_str(raw.trim()) {
            Ok(uuid) => Self(uuid),
            Err(_) => Self(Uuid::new_v5(&LEGACY_ID_NAMESPACE, raw.as_bytes())),
        }
    }
}

/// Namespace for [`ActionId::from_legacy`].
const LEGACY_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6e67_6167_6533_3630_8000_0000_0000_0001);

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ActionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ActionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::invalid_id(format!("ActionId: {}", e)))?;
        Ok(Self(uuid))
    }
}

/// User identifier (the identity provider's uid, also the `users` document id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

/// Booking document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(String);

/// Program document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramId(String);

macro_rules! impl_document_id {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap a store-assigned id without validation.
            ///
            /// Use `parse` for ids that come from user input.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: empty", $name)));
                }
                if trimmed.contains('/') {
                    return Err(DomainError::invalid_id(format!(
                        "{}: '/' is not allowed in document ids",
                        $name
                    )));
                }
                Ok(Self(trimmed.to_string()))
            }
        }
    };
}

impl_document_id!(UserId, "UserId");
impl_document_id!(BookingId, "BookingId");
impl_document_id!(ProgramId, "ProgramId");
