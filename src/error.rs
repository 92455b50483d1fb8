//! Error types for ledger-backup
//!
//! Every fallible operation in the crate returns [`BackupResult`]. The three
//! backup-specific failures (creation, restore, verification) are separate
//! variants so callers can tell "the archive is corrupt" apart from "the disk
//! is full" without string matching.

use thiserror::Error;

/// The main error type for backup operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// A backup could not be produced
    #[error("Backup creation failed: {0}")]
    Creation(String),

    /// A restore was aborted or could not complete
    #[error("Backup restore failed: {0}")]
    Restore(String),

    /// A checksum did not match, or a restored file failed its health check
    #[error("Backup verification failed: {0}")]
    Verification(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// YAML serialization/deserialization errors
    #[error("YAML error: {0}")]
    Yaml(String),

    /// SQLite errors
    #[error("Database error: {0}")]
    Database(String),

    /// Archive (zip) errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// Export errors
    #[error("Export error: {0}")]
    Export(String),

    /// Import errors
    #[error("Import error: {0}")]
    Import(String),

    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },
}

impl BackupError {
    /// Create a "not found" error for files
    pub fn file_not_found(path: impl AsRef<std::path::Path>) -> Self {
        Self::NotFound {
            entity_type: "File",
            identifier: path.as_ref().display().to_string(),
        }
    }

    /// Create a "not found" error for tables
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Table",
            identifier: name.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a checksum/health verification failure
    pub fn is_verification(&self) -> bool {
        matches!(self, Self::Verification(_))
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<serde_yaml::Error> for BackupError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

impl From<rusqlite::Error> for BackupError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<zip::result::ZipError> for BackupError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<csv::Error> for BackupError {
    fn from(err: csv::Error) -> Self {
        Self::Import(err.to_string())
    }
}

/// Result type alias for backup operations
pub type BackupResult<T> = Result<T, BackupError>;
