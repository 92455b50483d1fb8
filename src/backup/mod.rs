//! Backup system for ledger-backup
//!
//! Produces verifiable, restorable snapshots of a single-file SQLite
//! database, on demand or on a schedule.
//!
//! # Architecture
//!
//! - [`integrity`]: streaming SHA-256 checksums in `.checksum` sidecars
//! - [`archive`]: single-entry zip archives (and multi-entry for exports)
//! - [`incremental`]: snapshots holding only rows changed since a baseline
//! - [`retention`]: count-based pruning of old backups
//! - [`scheduler`]: a cancellable background ticker
//! - [`transfer`]: CSV/JSON export and import
//! - [`BackupManager`]: composes all of the above
//!
//! # Backup Format
//!
//! Database backups live in `backups/database/` as
//! `db_backup_{full|incremental}_{YYYYMMDD_HHMMSS}.db.zip`. Each archive holds
//! one SQLite file and has a JSON sidecar recording its digest, kind, and
//! start time. `last_backup_info.json` points at the newest backup and is the
//! baseline for the next incremental.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ledger_backup::backup::{BackupKind, BackupManager};
//! use ledger_backup::config::{AppPaths, ConfigStore};
//!
//! let paths = AppPaths::new()?;
//! let config = Arc::new(ConfigStore::load(paths.clone())?);
//! let manager = BackupManager::from_config(paths, config);
//!
//! let record = manager.backup_database(BackupKind::Full)?;
//! manager.verify_backup(&record.path)?;
//!
//! // Later
//! let outcome = manager.restore_database(&record.path)?;
//! println!("{}", outcome.summary());
//! ```

pub mod archive;
pub mod incremental;
pub mod integrity;
mod manager;
pub mod record;
pub mod retention;
pub mod scheduler;
pub mod transfer;

pub use integrity::Verification;
pub use manager::{BackupManager, RestoreOutcome};
pub use record::{BackupKind, BackupRecord, LastBackupInfo};
pub use retention::RetentionPolicy;
pub use scheduler::Scheduler;
pub use transfer::{ExportFormat, ExportSummary, ImportSummary};
