//! Backup settings
//!
//! The backup engine never owns configuration; it reads values through a
//! [`ConfigProvider`]. This module defines that seam, the built-in defaults,
//! and the typed [`RetentionConfig`] derived from it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Config key for the live database path
pub const KEY_DATABASE_PATH: &str = "system.database.path";
/// Config key toggling scheduled backups
pub const KEY_BACKUP_ENABLED: &str = "system.database.backup_enabled";
/// Config key for the scheduled backup interval in days
pub const KEY_BACKUP_INTERVAL_DAYS: &str = "system.database.backup_interval_days";
/// Config key for the number of backups to retain
pub const KEY_MAX_BACKUPS: &str = "system.database.max_backups";

/// Read-only key lookup over a hierarchical configuration
///
/// Keys are dotted paths (`system.database.max_backups`).
pub trait ConfigProvider: Send + Sync {
    /// Look up a raw value, returning `None` when any path segment is missing
    fn get_value(&self, key: &str) -> Option<serde_yaml::Value>;
}

/// Look up a typed value, falling back to `default` when the key is missing
/// or holds a value of the wrong shape
pub fn value_or<T: DeserializeOwned>(provider: &dyn ConfigProvider, key: &str, default: T) -> T {
    match provider.get_value(key) {
        Some(value) => serde_yaml::from_value(value).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "Ignoring malformed config value");
            default
        }),
        None => default,
    }
}

/// Walk a dotted key path through a YAML mapping tree
pub fn lookup_path(root: &serde_yaml::Value, key: &str) -> Option<serde_yaml::Value> {
    let mut current = root;
    for segment in key.split('.') {
        current = current.as_mapping()?.get(segment)?;
    }
    Some(current.clone())
}

/// `system.database` section of the configuration store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the live database (relative paths resolve against the app root)
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Whether scheduled backups may run
    #[serde(default = "default_backup_enabled")]
    pub backup_enabled: bool,

    /// Days between scheduled backups
    #[serde(default = "default_interval_days")]
    pub backup_interval_days: u32,

    /// Number of database backups to keep
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

fn default_database_path() -> String {
    "personal_data.db".to_string()
}

fn default_backup_enabled() -> bool {
    true
}

fn default_interval_days() -> u32 {
    7
}

fn default_max_backups() -> usize {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            backup_enabled: default_backup_enabled(),
            backup_interval_days: default_interval_days(),
            max_backups: default_max_backups(),
        }
    }
}

#[derive(Serialize)]
struct SystemSection<'a> {
    database: &'a DatabaseSettings,
}

#[derive(Serialize)]
struct DefaultTree<'a> {
    system: SystemSection<'a>,
}

impl DatabaseSettings {
    /// Read the section from any provider, key by key
    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        Self {
            path: value_or(provider, KEY_DATABASE_PATH, default_database_path()),
            backup_enabled: value_or(provider, KEY_BACKUP_ENABLED, default_backup_enabled()),
            backup_interval_days: value_or(
                provider,
                KEY_BACKUP_INTERVAL_DAYS,
                default_interval_days(),
            ),
            max_backups: value_or(provider, KEY_MAX_BACKUPS, default_max_backups()),
        }
    }

    /// The full default configuration tree, as written to a fresh config.yaml
    pub fn default_tree() -> serde_yaml::Value {
        let settings = Self::default();
        let tree = DefaultTree {
            system: SystemSection {
                database: &settings,
            },
        };
        serde_yaml::to_value(tree).unwrap_or(serde_yaml::Value::Null)
    }
}

/// Retention and scheduling settings consumed by the backup manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Maximum number of database backups kept on disk
    pub max_backups: usize,
    /// Days between scheduled backups
    pub interval_days: u32,
    /// Whether scheduled backups are enabled
    pub enabled: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_backups: default_max_backups(),
            interval_days: default_interval_days(),
            enabled: default_backup_enabled(),
        }
    }
}

impl RetentionConfig {
    /// Build from a config provider, using defaults for missing keys
    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        let settings = DatabaseSettings::from_provider(provider);
        Self {
            max_backups: settings.max_backups,
            interval_days: settings.backup_interval_days,
            enabled: settings.backup_enabled,
        }
    }
}
