//! Retention policy
//!
//! Keeps the newest `max_backups` backups and deletes the rest, each together
//! with its checksum sidecar. Pruning is idempotent: a second run with no new
//! backups deletes nothing.

use std::path::PathBuf;

use tracing::{debug, error};

use super::integrity::sidecar_path;
use super::record::BackupRecord;
use crate::error::{BackupError, BackupResult};
use crate::storage::file_io::remove_if_exists;

/// Count-based retention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_backups: usize,
}

impl RetentionPolicy {
    /// Create a policy keeping `max_backups` backups
    ///
    /// A limit of zero is raised to one so the backup just taken survives.
    pub fn new(max_backups: usize) -> Self {
        Self {
            max_backups: max_backups.max(1),
        }
    }

    /// Effective number of backups kept
    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// Split backups into (kept, removed), both newest first
    pub fn plan<'a>(
        &self,
        backups: &'a [BackupRecord],
    ) -> (Vec<&'a BackupRecord>, Vec<&'a BackupRecord>) {
        let mut sorted: Vec<&BackupRecord> = backups.iter().collect();
        sorted.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));

        let removed = sorted.split_off(self.max_backups.min(sorted.len()));
        (sorted, removed)
    }

    /// Delete every backup beyond the limit, with its sidecar
    ///
    /// Returns the deleted backup paths. Every candidate is attempted; if any
    /// deletion fails the error names all failures.
    pub fn prune(&self, backups: &[BackupRecord]) -> BackupResult<Vec<PathBuf>> {
        let (_, removed) = self.plan(backups);
        let mut deleted = Vec::new();
        let mut failures = Vec::new();

        for backup in removed {
            let result = remove_if_exists(&backup.path)
                .and_then(|_| remove_if_exists(&sidecar_path(&backup.path)));
            match result {
                Ok(_) => {
                    debug!(file = %backup.filename, "Old backup deleted");
                    deleted.push(backup.path.clone());
                }
                Err(e) => {
                    error!(file = %backup.filename, error = %e, "Failed to delete old backup");
                    failures.push(format!("{}: {}", backup.filename, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(deleted)
        } else {
            Err(BackupError::Io(format!(
                "Failed to prune {} backup(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::record::BackupKind;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn record(dir: &Path, day: u32) -> BackupRecord {
        let filename = format!("db_backup_full_202401{:02}_000000.db", day);
        let path = dir.join(&filename);
        fs::write(&path, b"db").unwrap();
        fs::write(sidecar_path(&path), "sum").unwrap();
        BackupRecord {
            path,
            filename,
            kind: BackupKind::Full,
            created_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            sequence: 0,
            checksum: None,
            size_bytes: 2,
        }
    }

    #[test]
    fn test_plan_keeps_newest() {
        let temp_dir = TempDir::new().unwrap();
        let backups: Vec<_> = [2, 5, 1, 4, 3]
            .into_iter()
            .map(|d| record(temp_dir.path(), d))
            .collect();

        let (kept, removed) = RetentionPolicy::new(3).plan(&backups);
        let kept_days: Vec<_> = kept.iter().map(|b| b.created_at.format("%d").to_string()).collect();
        assert_eq!(kept_days, vec!["05", "04", "03"]);
        assert_eq!(removed.len(), 2);
    }

    #[test]
    fn test_prune_deletes_files_and_sidecars() {
        let temp_dir = TempDir::new().unwrap();
        let backups: Vec<_> = (1..=5).map(|d| record(temp_dir.path(), d)).collect();

        let deleted = RetentionPolicy::new(3).prune(&backups).unwrap();

        assert_eq!(deleted.len(), 2);
        for old in &backups[..2] {
            assert!(!old.path.exists());
            assert!(!sidecar_path(&old.path).exists());
        }
        for kept in &backups[2..] {
            assert!(kept.path.exists());
            assert!(sidecar_path(&kept.path).exists());
        }
    }

    #[test]
    fn test_prune_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let backups: Vec<_> = (1..=5).map(|d| record(temp_dir.path(), d)).collect();
        let policy = RetentionPolicy::new(3);

        policy.prune(&backups).unwrap();
        let survivors: Vec<_> = backups.into_iter().filter(|b| b.path.exists()).collect();
        assert!(policy.prune(&survivors).unwrap().is_empty());
        assert_eq!(survivors.len(), 3);
    }

    #[test]
    fn test_zero_limit_keeps_one() {
        let policy = RetentionPolicy::new(0);
        assert_eq!(policy.max_backups(), 1);
    }
}
