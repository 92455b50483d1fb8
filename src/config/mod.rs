//! Configuration module for ledger-backup
//!
//! This module provides:
//! - Application path resolution and directory layout
//! - The `ConfigProvider` seam and typed backup settings
//! - A YAML-backed configuration store with its own backups

pub mod paths;
pub mod settings;
pub mod store;

pub use paths::AppPaths;
pub use settings::{ConfigProvider, DatabaseSettings, RetentionConfig};
pub use store::{ConfigBackupInfo, ConfigStore};
