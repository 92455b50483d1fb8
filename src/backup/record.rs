//! Backup records and filename conventions
//!
//! Database backups are named `db_backup_{kind}_{YYYYMMDD_HHMMSS}.db.zip`.
//! When two backups land in the same second the later one carries a `-N`
//! suffix on the timestamp (`..._20240101_000000-1.db.zip`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::BackupError;

/// Filename prefix for database backups
pub const DB_BACKUP_PREFIX: &str = "db_backup_";
/// Extension of an uncompressed database snapshot
pub const DB_EXTENSION: &str = ".db";
/// Extension appended by the archiver
pub const ARCHIVE_EXTENSION: &str = ".zip";
/// Timestamp layout embedded in backup filenames
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Kind of database backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Complete copy of the database
    #[default]
    Full,
    /// Rows changed since the last recorded backup
    Incremental,
}

impl BackupKind {
    /// Lowercase name as used in filenames
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(BackupError::Config(format!("Unknown backup kind: {}", other))),
        }
    }
}

/// A database backup on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Full path to the backup file
    pub path: PathBuf,
    /// Backup filename
    pub filename: String,
    /// Full or incremental
    pub kind: BackupKind,
    /// When the backup was taken
    pub created_at: DateTime<Utc>,
    /// Same-second collision counter from the filename
    #[serde(default)]
    pub sequence: u32,
    /// SHA-256 digest from the sidecar, if one exists
    pub checksum: Option<String>,
    /// Size in bytes
    pub size_bytes: u64,
}

impl BackupRecord {
    /// Whether the file is a compressed archive
    pub fn is_archive(&self) -> bool {
        super::archive::is_archive_path(&self.path)
    }

    /// Ordering key, newest last
    pub(crate) fn sort_key(&self) -> (DateTime<Utc>, u32) {
        (self.created_at, self.sequence)
    }
}

/// Pointer to the most recent successful database backup
///
/// Persisted as `last_backup_info.json` in the database backup directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastBackupInfo {
    /// Path of the backup file
    pub file_path: PathBuf,
    /// Full or incremental
    pub kind: BackupKind,
    /// Start time of the backup; the baseline for the next incremental
    pub created_at: DateTime<Utc>,
    /// SHA-256 digest of the backup file
    pub checksum: Option<String>,
    /// Size in bytes
    pub size_bytes: u64,
}

impl From<&BackupRecord> for LastBackupInfo {
    fn from(record: &BackupRecord) -> Self {
        Self {
            file_path: record.path.clone(),
            kind: record.kind,
            created_at: record.created_at,
            checksum: record.checksum.clone(),
            size_bytes: record.size_bytes,
        }
    }
}

/// Filename stem for a new database backup, without extension
pub fn db_backup_stem(kind: BackupKind, at: DateTime<Utc>) -> String {
    format!("{}{}_{}", DB_BACKUP_PREFIX, kind, at.format(STAMP_FORMAT))
}

/// Fields recovered from a database backup filename
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedBackupName {
    pub kind: BackupKind,
    pub created_at: DateTime<Utc>,
    pub sequence: u32,
}

/// Whether a filename looks like a database backup (compressed or not)
pub fn is_db_backup_name(filename: &str) -> bool {
    filename.starts_with(DB_BACKUP_PREFIX)
        && (filename.ends_with(DB_EXTENSION)
            || filename.ends_with(&format!("{}{}", DB_EXTENSION, ARCHIVE_EXTENSION)))
}

/// Parse kind and timestamp out of a database backup filename
pub fn parse_db_backup_name(filename: &str) -> Option<ParsedBackupName> {
    let rest = filename.strip_prefix(DB_BACKUP_PREFIX)?;
    let rest = rest.strip_suffix(ARCHIVE_EXTENSION).unwrap_or(rest);
    let rest = rest.strip_suffix(DB_EXTENSION)?;

    let (kind, stamp) = rest.split_once('_')?;
    let kind = kind.parse().ok()?;
    let (created_at, sequence) = parse_stamp(stamp)?;

    Some(ParsedBackupName {
        kind,
        created_at,
        sequence,
    })
}

/// Parse `YYYYMMDD_HHMMSS` with an optional `-N` sequence suffix
pub fn parse_stamp(stamp: &str) -> Option<(DateTime<Utc>, u32)> {
    let (time, sequence) = match stamp.split_once('-') {
        Some((time, seq)) => (time, seq.parse().ok()?),
        None => (stamp, 0),
    };

    let naive = NaiveDateTime::parse_from_str(time, STAMP_FORMAT).ok()?;
    Some((DateTime::from_naive_utc_and_offset(naive, Utc), sequence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn test_stem_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 5, 13, 4, 9).unwrap();
        assert_eq!(
            db_backup_stem(BackupKind::Incremental, at),
            "db_backup_incremental_20240105_130409"
        );
    }

    #[test]
    fn test_parse_archive_name() {
        let parsed = parse_db_backup_name("db_backup_full_20240103_000000.db.zip").unwrap();
        assert_eq!(parsed.kind, BackupKind::Full);
        assert_eq!(parsed.created_at.day(), 3);
        assert_eq!(parsed.sequence, 0);
    }

    #[test]
    fn test_parse_plain_name_with_sequence() {
        let parsed =
            parse_db_backup_name("db_backup_incremental_20251127_143022-2.db").unwrap();
        assert_eq!(parsed.kind, BackupKind::Incremental);
        assert_eq!(parsed.created_at.year(), 2025);
        assert_eq!(parsed.created_at.hour(), 14);
        assert_eq!(parsed.created_at.second(), 22);
        assert_eq!(parsed.sequence, 2);
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(parse_db_backup_name("last_backup_info.json").is_none());
        assert!(parse_db_backup_name("db_backup_weekly_20240101_000000.db").is_none());
        assert!(parse_db_backup_name("db_backup_full_2024_000000.db").is_none());
        assert!(parse_db_backup_name("db_backup_full_20240101_000000.db.checksum").is_none());
    }

    #[test]
    fn test_is_db_backup_name() {
        assert!(is_db_backup_name("db_backup_full_20240101_000000.db"));
        assert!(is_db_backup_name("db_backup_full_20240101_000000.db.zip"));
        assert!(!is_db_backup_name("db_backup_full_20240101_000000.db.zip.checksum"));
        assert!(!is_db_backup_name("config_backup_20240101_000000.yaml"));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("FULL".parse::<BackupKind>().unwrap(), BackupKind::Full);
        assert!("partial".parse::<BackupKind>().is_err());
    }
}
