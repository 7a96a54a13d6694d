use thiserror::Error;

use crate::EntityKind;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote store could not be reached at all. Aborts the session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The remote store reported a busy/locked condition; safe to retry.
    #[error("Store busy: {0}")]
    StoreBusy(String),

    #[error("Store rejected {entity} payload (HTTP {status}): {message}")]
    Rejected {
        entity: EntityKind,
        status: u16,
        message: String,
    },

    #[error("Unexpected store response: {0}")]
    Decode(String),

    #[error("Invalid {entity} record: {reason}")]
    InvalidRecord { entity: EntityKind, reason: String },

    #[error(
        "Identity conflict for {entity}: primary id {primary} -> #{primary_store}, \
         secondary id {secondary} -> #{secondary_store}"
    )]
    IdentityConflict {
        entity: EntityKind,
        primary: i64,
        primary_store: u32,
        secondary: i64,
        secondary_store: u32,
    },

    #[error("Invalid state for {entity}: {message}")]
    InvalidState { entity: EntityKind, message: String },

    /// Bulk session opened twice, or ended without being opened.
    #[error("Session error: {0}")]
    Session(String),

    #[error("Dependent cascade {parent} -> {dependent} failed: {message}")]
    Cascade {
        parent: EntityKind,
        dependent: EntityKind,
        message: String,
    },
}

impl SyncError {
    /// Errors the dispatcher retries after a fixed delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::StoreBusy(_))
    }

    /// Errors that abort the whole import session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Connection(_) | SyncError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
