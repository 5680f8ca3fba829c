//! Error types for the sync layer.

use shopfront_engine::Generation;

/// Failures reported by a [`crate::remote::RemoteStore`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Connectivity failures; the caller may re-attempt later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Component-level error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    TransientNetwork(StoreError),

    /// Rejected by a business rule before any write
    #[error("{0}")]
    Policy(shopfront_engine::Error),

    #[error("{0}")]
    Engine(shopfront_engine::Error),

    #[error("session is closed")]
    SessionClosed,

    /// The session was torn down while the operation was in flight
    #[error("result of session epoch {0} discarded after teardown")]
    StaleGeneration(Generation),

    #[error("remote store error: {0}")]
    Store(StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    pub fn is_policy(&self) -> bool {
        matches!(self, SyncError::Policy(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            SyncError::TransientNetwork(e)
        } else {
            SyncError::Store(e)
        }
    }
}

impl From<shopfront_engine::Error> for SyncError {
    fn from(e: shopfront_engine::Error) -> Self {
        if e.is_policy() {
            SyncError::Policy(e)
        } else {
            SyncError::Engine(e)
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
