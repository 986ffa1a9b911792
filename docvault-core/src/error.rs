/*!
Error types for the Docvault core engine.

Only fatal conditions are represented here. A failure to read or write a single
collection is recorded as data on the snapshot or recovery record and never
surfaces as a `VaultError` from the coordinators.
*/

use crate::registry::OperationKind;
use docvault_retry::RetryableError;
use thiserror::Error;

/// Result type used throughout the Docvault core.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors that can occur during backup, validation, recovery and retention.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Another backup or recovery already holds the operation slot
    #[error("Cannot start {requested}: {active} is already in progress")]
    Conflict {
        requested: OperationKind,
        active: OperationKind,
    },

    /// Unknown backup id
    #[error("Backup not found: {0}")]
    NotFound(String),

    /// Snapshot failed its integrity check, or the caller supplied bad input
    #[error("Validation failed for {target}: {}", .issues.join("; "))]
    Validation { target: String, issues: Vec<String> },

    /// Stored blob could not be decompressed or deserialized
    #[error("Corrupt snapshot {key}: {reason}")]
    CorruptSnapshot { key: String, reason: String },

    /// Fatal failure while creating a backup
    #[error("Backup {backup_id} failed after capturing {collections_captured} collection(s): {source}")]
    BackupFailed {
        backup_id: String,
        collections_captured: usize,
        #[source]
        source: Box<VaultError>,
    },

    /// Fatal failure before any document could be restored
    #[error("Recovery {recovery_id} of backup {backup_id} failed: {source}")]
    RecoveryFailed {
        recovery_id: String,
        backup_id: String,
        #[source]
        source: Box<VaultError>,
    },

    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression/decompression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Backup store errors that retrying will not fix
    #[error("Storage error: {0}")]
    Storage(String),

    /// Backup store temporarily unreachable; retried with backoff
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Data source errors (per-collection, recorded rather than propagated)
    #[error("Data source error: {0}")]
    Source(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VaultError {
    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a transient storage error
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a new data source error
    pub fn source_error<S: Into<String>>(msg: S) -> Self {
        Self::Source(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error carrying a single issue
    pub fn validation<T: Into<String>, S: Into<String>>(target: T, issue: S) -> Self {
        Self::Validation {
            target: target.into(),
            issues: vec![issue.into()],
        }
    }

    /// Create a corrupt snapshot error
    pub fn corrupt<K: Into<String>, S: Into<String>>(key: K, reason: S) -> Self {
        Self::CorruptSnapshot {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True for the precondition failures that abort before any work starts
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::NotFound(_) | Self::Validation { .. }
        )
    }
}

impl RetryableError for VaultError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            Self::Unavailable(_) => true,
            _ => false,
        }
    }
}
