//! Path management for ledger-backup
//!
//! Resolves the application root and the directory layout beneath it:
//!
//! ```text
//! <root>/
//!   personal_data.db          default database location
//!   config/config.yaml        configuration store
//!   backups/database/         db_backup_{kind}_{YYYYMMDD_HHMMSS}.db.zip (+ .checksum)
//!   backups/config/           config_backup_{YYYYMMDD_HHMMSS}.yaml
//!   backups/temp/             extraction scratch space
//!   exports/                  export_{YYYYMMDD_HHMMSS}.zip
//! ```
//!
//! ## Root Resolution Order
//!
//! 1. `LEDGER_BACKUP_ROOT` environment variable (if set)
//! 2. The platform data directory for `ledger-backup`

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::BackupError;

/// Environment variable overriding the application root
pub const ROOT_ENV_VAR: &str = "LEDGER_BACKUP_ROOT";

/// Manages all paths used by ledger-backup
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    /// Create a new AppPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined and the
    /// environment override is not set.
    pub fn new() -> Result<Self, BackupError> {
        let root = if let Ok(custom) = std::env::var(ROOT_ENV_VAR) {
            PathBuf::from(custom)
        } else {
            ProjectDirs::from("", "", "ledger-backup")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or_else(|| {
                    BackupError::Config("Could not determine a data directory".into())
                })?
        };

        Ok(Self { root })
    }

    /// Create AppPaths with a custom root directory (useful for testing)
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the application root
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Default location of the live database
    pub fn default_database_file(&self) -> PathBuf {
        self.root.join("personal_data.db")
    }

    /// Directory holding the configuration store
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    /// Path to the YAML configuration file
    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join("config.yaml")
    }

    /// Base backup directory (<root>/backups/)
    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Database backup directory (<root>/backups/database/)
    pub fn db_backup_dir(&self) -> PathBuf {
        self.backup_dir().join("database")
    }

    /// Config backup directory (<root>/backups/config/)
    pub fn config_backup_dir(&self) -> PathBuf {
        self.backup_dir().join("config")
    }

    /// Scratch directory for archive extraction (<root>/backups/temp/)
    pub fn temp_dir(&self) -> PathBuf {
        self.backup_dir().join("temp")
    }

    /// Export directory (<root>/exports/)
    pub fn export_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    /// Path to the persisted last-backup pointer
    pub fn last_backup_info_file(&self) -> PathBuf {
        self.db_backup_dir().join("last_backup_info.json")
    }

    /// Resolve a configured database path against the root
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            candidate
        } else {
            self.root.join(candidate)
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<(), BackupError> {
        for dir in [
            self.root.clone(),
            self.config_dir(),
            self.db_backup_dir(),
            self.config_backup_dir(),
            self.export_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                BackupError::Io(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_custom_root() {
        let temp_dir = TempDir::new().unwrap();
        let paths = AppPaths::with_root(temp_dir.path().to_path_buf());

        assert_eq!(paths.root(), temp_dir.path());
        assert_eq!(
            paths.db_backup_dir(),
            temp_dir.path().join("backups").join("database")
        );
        assert_eq!(
            paths.config_backup_dir(),
            temp_dir.path().join("backups").join("config")
        );
        assert_eq!(paths.export_dir(), temp_dir.path().join("exports"));
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = AppPaths::with_root(temp_dir.path().to_path_buf());

        paths.ensure_directories().unwrap();

        assert!(paths.db_backup_dir().exists());
        assert!(paths.config_backup_dir().exists());
        assert!(paths.export_dir().exists());
        assert!(paths.config_dir().exists());
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let paths = AppPaths::with_root(temp_dir.path().to_path_buf());

        assert_eq!(paths.resolve("data.db"), temp_dir.path().join("data.db"));

        let absolute = temp_dir.path().join("elsewhere.db");
        assert_eq!(paths.resolve(absolute.to_str().unwrap()), absolute);
    }

    #[test]
    fn test_last_backup_info_location() {
        let temp_dir = TempDir::new().unwrap();
        let paths = AppPaths::with_root(temp_dir.path().to_path_buf());

        assert_eq!(
            paths.last_backup_info_file(),
            paths.db_backup_dir().join("last_backup_info.json")
        );
    }
}
