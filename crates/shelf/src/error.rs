//! Error types for sync and backend operations

use crate::models::EntityKind;

/// Result type for backend and coordinator operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by backends and the sync coordinator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// Network or HTTP failure, including a request still rejected after
    /// the session was refreshed
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The session could not be refreshed; the user has to sign in again
    #[error("Authentication expired")]
    AuthExpired,

    /// A single remote row failed validation
    #[error("Malformed remote {kind} record: {reason}")]
    MalformedRemoteRecord { kind: EntityKind, reason: String },

    /// No credentials or session for the selected backend
    #[error("Backend not configured")]
    BackendNotConfigured,

    /// Local store failure
    #[error("Store error: {message}")]
    Store { message: String },

    /// Another pass for the same backend and kind is already running
    #[error("Sync already in progress for {kind} on {backend}")]
    SyncInProgress { backend: String, kind: EntityKind },
}

impl SyncError {
    pub fn transport(message: impl Into<String>) -> Self {
        SyncError::Transport {
            message: message.into(),
        }
    }

    pub fn malformed(kind: EntityKind, reason: impl Into<String>) -> Self {
        SyncError::MalformedRemoteRecord {
            kind,
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        SyncError::Store {
            message: format!("{:#}", e),
        }
    }
}

impl From<ureq::Error> for SyncError {
    fn from(e: ureq::Error) -> Self {
        SyncError::Transport {
            message: e.to_string(),
        }
    }
}
