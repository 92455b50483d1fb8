//! ledger-backup - verifiable backups for a single-file SQLite ledger
//!
//! This library snapshots a live SQLite database (full or incremental),
//! compresses and checksums each snapshot, prunes old ones, restores them
//! safely, and exports or imports table data as CSV/JSON. A YAML
//! configuration store supplies the settings and is backed up alongside.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Path layout, settings, and the YAML configuration store
//! - `error`: Custom error types
//! - `storage`: Atomic file helpers and the SQLite data store
//! - `backup`: Snapshot, archive, checksum, retention, and scheduling
//! - `cli`: Command handlers for the `ledger-backup` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ledger_backup::backup::{BackupKind, BackupManager};
//! use ledger_backup::config::{AppPaths, ConfigStore};
//!
//! let paths = AppPaths::new()?;
//! paths.ensure_directories()?;
//! let config = Arc::new(ConfigStore::load(paths.clone())?);
//! let manager = BackupManager::from_config(paths, config);
//! let record = manager.backup_database(BackupKind::Incremental)?;
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod storage;

pub use error::{BackupError, BackupResult};
