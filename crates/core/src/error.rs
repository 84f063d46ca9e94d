//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Infrastructure failures (storage, network) have their own error types in
/// the crates that own that infrastructure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
