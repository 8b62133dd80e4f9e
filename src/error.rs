//! Error types for the live task list.
//!
//! [`StoreError`] is what a [`RemoteStore`](crate::store::RemoteStore)
//! reports. [`SyncError`] is what the engine surfaces to its caller; every
//! variant is recoverable and maps to an inline message, never a crash.

use thiserror::Error;

/// Failure reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The request never reached the store, or the connection dropped.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The store received a well-formed request and refused it
    /// (constraint violation, unknown row, ...).
    #[error("rejected by store: {0}")]
    Rejected(String),
}

/// Errors surfaced by the sync engine.
///
/// # Examples
///
/// ```
/// use taskers_live::{StoreError, SyncError};
///
/// let err = SyncError::from(StoreError::Rejected("duplicate email".to_string()));
/// assert!(matches!(err, SyncError::Command(_)));
/// assert!(err.to_string().contains("duplicate email"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Input rejected locally; no remote call was made.
    #[error("{0}")]
    Validation(String),

    /// A remote call failed or the change feed dropped.
    #[error("connection problem: {0}")]
    Transport(String),

    /// The store rejected a command.
    #[error("request failed: {0}")]
    Command(String),
}

impl SyncError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transport(msg) => Self::Transport(msg),
            StoreError::Rejected(msg) => Self::Command(msg),
        }
    }
}
