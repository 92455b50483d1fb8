//! CLI command handlers
//!
//! Bridges the clap argument parsing in the binary with the backup manager
//! and configuration store.

pub mod backup;

pub use backup::{handle_backup_command, BackupCommands};
