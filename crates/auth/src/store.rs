//! Backing-store failure model shared by every store contract in this crate.

use thiserror::Error;

/// Storage error.
///
/// These are infrastructure failures, never security decisions. Callers that
/// make security decisions treat any `StoreError` as "deny".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,

    /// An atomic write lost against a concurrent writer.
    #[error("conflicting concurrent update: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}
