//! YAML configuration store
//!
//! Holds the configuration tree in memory, persists it to
//! `config/config.yaml` and keeps timestamped copies of it under
//! `backups/config/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::paths::AppPaths;
use super::settings::{lookup_path, ConfigProvider, DatabaseSettings};
use crate::backup::record::{parse_stamp, STAMP_FORMAT};
use crate::error::{BackupError, BackupResult};
use crate::storage::file_io::{remove_if_exists, unique_path, write_bytes_atomic};

/// Filename prefix of configuration backups
pub const CONFIG_BACKUP_PREFIX: &str = "config_backup_";

/// Extension of configuration files and their backups
pub const CONFIG_EXTENSION: &str = ".yaml";

/// A configuration backup on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigBackupInfo {
    pub path: PathBuf,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub sequence: u32,
    pub size_bytes: u64,
}

/// The configuration tree backing every [`ConfigProvider`] lookup
pub struct ConfigStore {
    paths: AppPaths,
    values: RwLock<serde_yaml::Value>,
}

impl ConfigStore {
    /// Load `config.yaml`, or start from the defaults when it does not exist
    pub fn load(paths: AppPaths) -> BackupResult<Self> {
        let file = paths.config_file();
        let values = if file.exists() {
            let contents = fs::read_to_string(&file)
                .map_err(|e| BackupError::Io(format!("Failed to read {}: {}", file.display(), e)))?;
            serde_yaml::from_str(&contents).map_err(|e| {
                BackupError::Yaml(format!("Failed to parse {}: {}", file.display(), e))
            })?
        } else {
            DatabaseSettings::default_tree()
        };

        Ok(Self {
            paths,
            values: RwLock::new(values),
        })
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// Write the current tree to `config.yaml` atomically
    pub fn save(&self) -> BackupResult<()> {
        let yaml = serde_yaml::to_string(&*self.read_values())?;
        write_bytes_atomic(self.paths.config_file(), yaml.as_bytes())
    }

    /// The `system.database` section with defaults applied
    pub fn database_settings(&self) -> DatabaseSettings {
        DatabaseSettings::from_provider(self)
    }

    /// Resolved path of the live database
    pub fn database_path(&self) -> PathBuf {
        self.paths.resolve(&self.database_settings().path)
    }

    /// Copy the current configuration into `backups/config/`
    ///
    /// Older backups beyond `system.database.max_backups` are deleted.
    pub fn backup(&self) -> BackupResult<PathBuf> {
        let dir = self.paths.config_backup_dir();
        fs::create_dir_all(&dir)?;

        let stem = format!("{}{}", CONFIG_BACKUP_PREFIX, Utc::now().format(STAMP_FORMAT));
        let target = unique_path(&dir, &stem, CONFIG_EXTENSION);

        let yaml = serde_yaml::to_string(&*self.read_values())?;
        write_bytes_atomic(&target, yaml.as_bytes()).inspect_err(|e| {
            error!(file = %target.display(), error = %e, "Config backup failed");
        })?;
        info!(file = %target.display(), "Config backup created");

        if let Err(e) = self.prune_backups() {
            warn!(error = %e, "Config backup created but pruning failed");
        }
        Ok(target)
    }

    /// Replace the configuration with the contents of `file`
    ///
    /// A safety backup of the current configuration is taken first; the
    /// restore file must parse to a non-empty mapping.
    pub fn restore(&self, file: &Path) -> BackupResult<()> {
        if !file.exists() {
            return Err(BackupError::file_not_found(file));
        }

        let contents = fs::read_to_string(file)?;
        let values: serde_yaml::Value = serde_yaml::from_str(&contents).map_err(|e| {
            BackupError::Restore(format!("Invalid config file {}: {}", file.display(), e))
        })?;
        match values.as_mapping() {
            Some(map) if !map.is_empty() => {}
            _ => {
                return Err(BackupError::Restore(format!(
                    "Config file {} holds no settings",
                    file.display()
                )))
            }
        }

        self.backup()?;

        *self.values.write().unwrap_or_else(|e| e.into_inner()) = values;
        self.save()?;
        info!(file = %file.display(), "Config restored");
        Ok(())
    }

    /// Configuration backups, newest first
    pub fn list_backups(&self) -> BackupResult<Vec<ConfigBackupInfo>> {
        let dir = self.paths.config_backup_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().to_string();
            let Some(stamp) = filename
                .strip_prefix(CONFIG_BACKUP_PREFIX)
                .and_then(|rest| rest.strip_suffix(CONFIG_EXTENSION))
            else {
                continue;
            };

            let metadata = entry.metadata()?;
            let (created_at, sequence) = match parse_stamp(stamp) {
                Some(parsed) => parsed,
                None => match metadata.modified() {
                    Ok(modified) => (DateTime::<Utc>::from(modified), 0),
                    Err(_) => continue,
                },
            };

            backups.push(ConfigBackupInfo {
                path: entry.path(),
                filename,
                created_at,
                sequence,
                size_bytes: metadata.len(),
            });
        }

        backups.sort_by(|a, b| (b.created_at, b.sequence).cmp(&(a.created_at, a.sequence)));
        Ok(backups)
    }

    fn prune_backups(&self) -> BackupResult<usize> {
        let keep = self.database_settings().max_backups.max(1);
        let mut removed = 0;
        for old in self.list_backups()?.into_iter().skip(keep) {
            if remove_if_exists(&old.path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn read_values(&self) -> std::sync::RwLockReadGuard<'_, serde_yaml::Value> {
        self.values.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl ConfigProvider for ConfigStore {
    fn get_value(&self, key: &str) -> Option<serde_yaml::Value> {
        lookup_path(&self.read_values(), key)
    }
}
