//! Error types for the queue state manager.

use crate::types::{EntryId, SessionId, Stage};
use thiserror::Error;

/// Main error type for queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Entry not found: {0}")]
    NotFound(EntryId),

    #[error("Invalid stage transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Option<Stage>, to: Stage },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Signups are closed")]
    SignupsClosed,

    #[error("Session {session} already holds the maximum of {limit} entries")]
    LimitReached { session: SessionId, limit: u32 },

    #[error("Signups closed while entry {0} was pending; entry removed")]
    EntryClosed(EntryId),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,
}

impl QueueError {
    /// Fold a driver error into `StoreUnavailable`, keeping the original message.
    pub(crate) fn into_store_unavailable(self) -> Self {
        match self {
            QueueError::StoreUnavailable(_) => self,
            other => QueueError::StoreUnavailable(other.to_string()),
        }
    }

    /// Fold a driver error into `Initialization`.
    pub(crate) fn into_initialization(self) -> Self {
        match self {
            QueueError::Initialization(_) => self,
            other => QueueError::Initialization(other.to_string()),
        }
    }

    /// Whether the caller is looking at a stale view and should ask the user to retry.
    pub fn is_stale_view(&self) -> bool {
        matches!(
            self,
            QueueError::NotFound(_) | QueueError::InvalidTransition { .. }
        )
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for QueueError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        QueueError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for QueueError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        QueueError::Deserialization(e.to_string())
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
