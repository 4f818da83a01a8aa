//! Error types for bronze-store
//!
//! Provides a unified error type for all operations.
//!
//! Absence of a record is never an error: lookups return `Ok(None)` or
//! `Ok(false)`. Archive verification failures are converted into a
//! `CompressionStatus::Error` by the archival engine and only appear here
//! as the internal cause.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using BronzeError
pub type Result<T> = std::result::Result<T, BronzeError>;

/// Unified error type for bronze-store operations
#[derive(Debug, Error)]
pub enum BronzeError {
    // -------------------------------------------------------------------------
    // Record I/O Errors
    // -------------------------------------------------------------------------
    #[error("Storage write failed for {path}: {cause}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        cause: io::Error,
    },

    #[error("Storage read failed for {path}: {cause}")]
    StorageRead {
        path: PathBuf,
        #[source]
        cause: io::Error,
    },

    // -------------------------------------------------------------------------
    // Lock Errors
    // -------------------------------------------------------------------------
    /// Manifest or archive lock, as named by `path`
    #[error("Timed out after {waited_ms} ms waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    // -------------------------------------------------------------------------
    // Manifest Errors
    // -------------------------------------------------------------------------
    #[error("Manifest corrupt at {path}: {reason}")]
    ManifestCorrupt { path: PathBuf, reason: String },

    // -------------------------------------------------------------------------
    // Archive Errors
    // -------------------------------------------------------------------------
    #[error("Archive verification failed for {path}: {reason}")]
    ArchiveVerification { path: PathBuf, reason: String },

    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("Invalid entity id {0:?}")]
    InvalidEntityId(String),

    #[error("Invalid date {0:?}: expected YYYYMMDD or YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Invalid source {0:?}")]
    InvalidSource(String),

    #[error("Refusing to store an empty payload")]
    EmptyPayload,

    #[error("Invalid phase name {0:?}")]
    InvalidPhase(String),

    // -------------------------------------------------------------------------
    // Configuration / Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Other I/O
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BronzeError {
    /// Wrap an I/O failure that happened while writing `path`
    pub fn write(path: impl Into<PathBuf>, cause: io::Error) -> Self {
        Self::StorageWrite {
            path: path.into(),
            cause,
        }
    }

    /// Wrap an I/O failure that happened while reading `path`
    pub fn read(path: impl Into<PathBuf>, cause: io::Error) -> Self {
        Self::StorageRead {
            path: path.into(),
            cause,
        }
    }

    /// True for errors caused by bad caller input rather than the disk
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidEntityId(_)
                | Self::InvalidDate(_)
                | Self::InvalidSource(_)
                | Self::EmptyPayload
                | Self::InvalidPhase(_)
        )
    }
}
