//! Error types for object stores.

use thiserror::Error;

/// Result type alias using [`StoreError`].
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by object stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A compare-and-set lost: the object changed since it was read.
    #[error("conflict updating {0}")]
    Conflict(String),

    /// Object not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Transport-level failure reaching the store.
    #[error("store transport error: {0}")]
    Transport(String),

    /// Internal store error.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Create a transport error.
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
