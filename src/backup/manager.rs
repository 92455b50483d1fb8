//! Backup manager for ledger-backup
//!
//! Composes the snapshot, archive, checksum, and retention pieces into the
//! public backup, restore, export, import, and scheduling operations. Every
//! mutating operation runs under one operation lock, shared with scheduled
//! ticks, so a manual restore can never interleave with a scheduled backup.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::archive;
use super::incremental;
use super::integrity::{self, Verification};
use super::record::{
    db_backup_stem, is_db_backup_name, parse_db_backup_name, BackupKind, BackupRecord,
    LastBackupInfo, ARCHIVE_EXTENSION, DB_EXTENSION, STAMP_FORMAT,
};
use super::retention::RetentionPolicy;
use super::scheduler::Scheduler;
use super::transfer::{self, ExportFormat, ExportSummary, ImportSummary};
use crate::config::{AppPaths, ConfigStore, RetentionConfig};
use crate::error::{BackupError, BackupResult};
use crate::storage::file_io::{remove_if_exists, unique_path};
use crate::storage::{read_json, replace_file_atomic, write_json_atomic};
use crate::storage::{DataStore, SqliteStore};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Result of a restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    /// The file the live database was restored from
    pub restored_from: PathBuf,
    /// Backup of the pre-restore state, if a live database existed
    pub safety_backup: Option<BackupRecord>,
    /// Whether the file matched an existing checksum or was trusted on first use
    #[serde(skip)]
    pub verification: Verification,
}

impl RestoreOutcome {
    /// One-line description for the CLI
    pub fn summary(&self) -> String {
        let mut summary = format!("Restored from {}", self.restored_from.display());
        if let Some(safety) = &self.safety_backup {
            summary.push_str(&format!(" (previous state saved as {})", safety.filename));
        }
        if self.verification == Verification::TrustedOnFirstUse {
            summary.push_str("; no checksum existed, one was created");
        }
        summary
    }
}

/// Manages database backups for one live database
#[derive(Clone)]
pub struct BackupManager {
    paths: AppPaths,
    store: Arc<dyn DataStore>,
    retention: RetentionConfig,
    config_store: Option<Arc<ConfigStore>>,
    op_lock: Arc<Mutex<()>>,
    scheduler: Arc<Mutex<Scheduler>>,
}

impl BackupManager {
    /// Create a new BackupManager
    pub fn new(paths: AppPaths, store: Arc<dyn DataStore>, retention: RetentionConfig) -> Self {
        Self {
            paths,
            store,
            retention,
            config_store: None,
            op_lock: Arc::new(Mutex::new(())),
            scheduler: Arc::new(Mutex::new(Scheduler::default())),
        }
    }

    /// Build a manager for the database and retention named in `config`
    ///
    /// The config store is attached, so scheduled ticks back it up too.
    pub fn from_config(paths: AppPaths, config: Arc<ConfigStore>) -> Self {
        let store = Arc::new(SqliteStore::new(config.database_path()));
        let retention = RetentionConfig::from_provider(config.as_ref());
        Self::new(paths, store, retention).with_config_store(config)
    }

    /// Also back up this configuration on every scheduled tick
    pub fn with_config_store(mut self, config: Arc<ConfigStore>) -> Self {
        self.config_store = Some(config);
        self
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn retention(&self) -> RetentionConfig {
        self.retention
    }

    /// Path of the live database
    pub fn database_path(&self) -> &Path {
        self.store.path()
    }

    /// Create a backup of the live database
    ///
    /// Writes `db_backup_{kind}_{YYYYMMDD_HHMMSS}.db.zip` with its checksum
    /// sidecar, records it as the last backup and prunes old backups. A
    /// failed prune is logged but does not fail the backup.
    pub fn backup_database(&self, kind: BackupKind) -> BackupResult<BackupRecord> {
        let _guard = self.lock();
        let record = self.backup_locked(kind)?;

        if let Err(e) = self.prune_locked() {
            warn!(error = %e, "Backup created but retention could not be enforced");
        }
        Ok(record)
    }

    fn backup_locked(&self, kind: BackupKind) -> BackupResult<BackupRecord> {
        self.create_backup(kind)
            .map_err(as_creation_error)
            .inspect_err(|e| error!(kind = %kind, error = %e, "Database backup failed"))
    }

    fn create_backup(&self, kind: BackupKind) -> BackupResult<BackupRecord> {
        if !self.store.exists() {
            return Err(BackupError::file_not_found(self.store.path()));
        }

        let dir = self.paths.db_backup_dir();
        fs::create_dir_all(&dir)?;

        let started = Utc::now();
        let archive_path = unique_path(
            &dir,
            &db_backup_stem(kind, started),
            &format!("{}{}", DB_EXTENSION, ARCHIVE_EXTENSION),
        );
        // Work files stay under backups/temp until the archive is complete
        let work_dir = self.scratch_dir("backup");
        fs::create_dir_all(&work_dir)?;
        let snapshot = work_dir.join(file_name_of(&archive_path.with_extension("")));

        let result = self.write_backup(kind, started, &snapshot, &archive_path);

        remove_scratch(&work_dir);
        if result.is_err() {
            let _ = remove_if_exists(&archive_path);
            let _ = remove_if_exists(&integrity::sidecar_path(&archive_path));
        }
        result
    }

    fn write_backup(
        &self,
        kind: BackupKind,
        started: chrono::DateTime<Utc>,
        snapshot: &Path,
        archive_path: &Path,
    ) -> BackupResult<BackupRecord> {
        match kind {
            BackupKind::Full => self.store.snapshot_to(snapshot)?,
            BackupKind::Incremental => {
                let baseline = self.last_backup_info()?;
                incremental::build(self.store.as_ref(), snapshot, baseline.as_ref())?;
            }
        }

        let compressed = archive::compress(snapshot)?;
        fs::rename(&compressed, archive_path).map_err(|e| {
            BackupError::Io(format!(
                "Failed to move archive into {}: {}",
                archive_path.display(),
                e
            ))
        })?;
        let sidecar = integrity::stamp(archive_path, Some(kind), Some(started))?;

        let filename = file_name_of(archive_path);
        let record = BackupRecord {
            path: archive_path.to_path_buf(),
            sequence: parse_db_backup_name(&filename)
                .map(|p| p.sequence)
                .unwrap_or(0),
            filename,
            kind,
            created_at: started,
            checksum: Some(sidecar.digest),
            size_bytes: sidecar.size_bytes,
        };

        write_json_atomic(
            self.paths.last_backup_info_file(),
            &LastBackupInfo::from(&record),
        )?;

        info!(
            file = %record.filename,
            kind = %kind,
            size_bytes = record.size_bytes,
            "Database backup created"
        );
        Ok(record)
    }

    /// Replace the live database with the contents of a backup
    ///
    /// A full backup of the current state is taken first, whatever happens
    /// next. The file is checked against its sidecar before anything is
    /// extracted, and the extracted database must pass an SQLite integrity
    /// check before it is swapped in with an atomic rename.
    pub fn restore_database(&self, file: &Path) -> BackupResult<RestoreOutcome> {
        let _guard = self.lock();

        let safety_backup = self.safety_backup()?;
        let result = self
            .restore_locked(file)
            .map_err(as_restore_error)
            .inspect_err(|e| error!(file = %file.display(), error = %e, "Restore failed"));

        if let Err(e) = self.prune_locked() {
            warn!(error = %e, "Retention could not be enforced after restore");
        }

        let verification = result?;
        info!(file = %file.display(), "Database restored");
        Ok(RestoreOutcome {
            restored_from: file.to_path_buf(),
            safety_backup,
            verification,
        })
    }

    fn restore_locked(&self, file: &Path) -> BackupResult<Verification> {
        let verification = integrity::verify(file)?;
        if verification == Verification::TrustedOnFirstUse {
            warn!(file = %file.display(), "Restoring from a backup without a prior checksum");
        }

        if !archive::is_archive_path(file) {
            SqliteStore::quick_check(file)?;
            replace_file_atomic(file, self.store.path())?;
            return Ok(verification);
        }

        let scratch = self.scratch_dir("restore");
        let result = archive::extract(file, &scratch).and_then(|extracted| {
            SqliteStore::quick_check(&extracted)?;
            replace_file_atomic(&extracted, self.store.path())
        });
        remove_scratch(&scratch);

        result.map(|()| verification)
    }

    /// Export tables (all when `tables` is `None`) to a zip of CSV or JSON files
    pub fn export_data(
        &self,
        format: ExportFormat,
        tables: Option<&[String]>,
    ) -> BackupResult<ExportSummary> {
        let _guard = self.lock();
        transfer::export_tables(
            self.store.as_ref(),
            &self.paths.export_dir(),
            format,
            tables,
            Utc::now(),
        )
        .inspect_err(|e| error!(error = %e, "Export failed"))
    }

    /// Import a CSV/JSON file or an export archive
    ///
    /// A loose file goes into `table`, defaulting to its file stem. Archive
    /// entries always go into the table named by their own file stem. A full
    /// backup is taken before anything is written.
    pub fn import_data(&self, file: &Path, table: Option<&str>) -> BackupResult<ImportSummary> {
        let _guard = self.lock();

        self.safety_backup()?;
        let result = self
            .import_locked(file, table)
            .inspect_err(|e| error!(file = %file.display(), error = %e, "Import failed"));

        if let Err(e) = self.prune_locked() {
            warn!(error = %e, "Retention could not be enforced after import");
        }
        result
    }

    fn import_locked(&self, file: &Path, table: Option<&str>) -> BackupResult<ImportSummary> {
        if !file.exists() {
            return Err(BackupError::file_not_found(file));
        }

        if archive::is_archive_path(file) {
            if let Some(table) = table {
                warn!(table, "Table name ignored for archive import");
            }
            return transfer::import_archive(
                self.store.as_ref(),
                file,
                &self.scratch_dir("import"),
            );
        }

        let table = match table {
            Some(table) => table.to_string(),
            None => file
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .ok_or_else(|| {
                    BackupError::Import(format!("Cannot derive a table name from {}", file.display()))
                })?,
        };

        let rows = transfer::import_file(self.store.as_ref(), file, &table)?;
        let mut summary = ImportSummary::default();
        summary.tables.insert(table, rows);
        Ok(summary)
    }

    /// Database backups, newest first
    ///
    /// Kind and timestamp come from the checksum sidecar when it has them,
    /// otherwise from the filename. An uncompressed `.db` without a sidecar
    /// was never finished and is not listed.
    pub fn list_backups(&self, kind: Option<BackupKind>) -> BackupResult<Vec<BackupRecord>> {
        let dir = self.paths.db_backup_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&dir)
            .map_err(|e| BackupError::Io(format!("Failed to read backup directory: {}", e)))?
        {
            let entry = entry
                .map_err(|e| BackupError::Io(format!("Failed to read directory entry: {}", e)))?;
            if let Some(record) = parse_backup_record(&entry.path()) {
                if kind.map_or(true, |k| k == record.kind) {
                    backups.push(record);
                }
            }
        }

        backups.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        Ok(backups)
    }

    /// Check a backup against its checksum sidecar
    pub fn verify_backup(&self, file: &Path) -> BackupResult<Verification> {
        integrity::verify(file)
            .inspect_err(|e| error!(file = %file.display(), error = %e, "Verification failed"))
    }

    /// Delete backups beyond the retention limit
    pub fn enforce_retention(&self) -> BackupResult<Vec<PathBuf>> {
        let _guard = self.lock();
        self.prune_locked()
    }

    fn prune_locked(&self) -> BackupResult<Vec<PathBuf>> {
        let policy = RetentionPolicy::new(self.retention.max_backups);
        let deleted = policy.prune(&self.list_backups(None)?)?;
        if !deleted.is_empty() {
            info!(count = deleted.len(), "Old backups deleted");
        }
        Ok(deleted)
    }

    /// The most recent backup, regenerating the pointer file if it is missing
    pub fn last_backup_info(&self) -> BackupResult<Option<LastBackupInfo>> {
        let file = self.paths.last_backup_info_file();
        match read_json::<LastBackupInfo, _>(&file) {
            Ok(Some(info)) => return Ok(Some(info)),
            Ok(None) => debug!("No last backup info recorded"),
            Err(e) => warn!(error = %e, "Unreadable last backup info, regenerating"),
        }

        let Some(newest) = self.list_backups(None)?.into_iter().next() else {
            return Ok(None);
        };
        let info = LastBackupInfo::from(&newest);
        write_json_atomic(&file, &info)?;
        info!(file = %newest.filename, "Last backup info regenerated");
        Ok(Some(info))
    }

    /// Start scheduled full backups every `interval_days`
    ///
    /// Returns `Ok(false)` if the scheduler was already running.
    pub fn start_scheduler(&self) -> BackupResult<bool> {
        let days = u64::from(self.retention.interval_days.max(1));
        self.start_scheduler_every(Duration::from_secs(days * SECONDS_PER_DAY))
    }

    /// Start scheduled full backups at an explicit interval
    pub fn start_scheduler_every(&self, interval: Duration) -> BackupResult<bool> {
        if !self.retention.enabled {
            return Err(BackupError::Scheduler(
                "Scheduled backups are disabled in the configuration".into(),
            ));
        }

        let mut scheduler = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if scheduler.is_running() {
            return Ok(false);
        }

        let worker = self.detached();
        Ok(scheduler.start(interval, move || worker.run_scheduled()))
    }

    /// Stop scheduled backups; `true` once no worker is running
    pub fn stop_scheduler(&self) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stop()
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_running()
    }

    fn run_scheduled(&self) {
        debug!("Scheduled backup tick");
        if let Err(e) = self.backup_database(BackupKind::Full) {
            error!(error = %e, "Scheduled database backup failed");
        }
        if let Some(config) = &self.config_store {
            if let Err(e) = config.backup() {
                error!(error = %e, "Scheduled config backup failed");
            }
        }
    }

    /// A handle for the scheduler thread that shares the operation lock but
    /// not the scheduler itself
    fn detached(&self) -> Self {
        Self {
            scheduler: Arc::new(Mutex::new(Scheduler::default())),
            ..self.clone()
        }
    }

    /// Full backup taken before restore and import
    ///
    /// A missing live database is not an error here: there is nothing to
    /// protect. Retention runs after the caller finishes so the file being
    /// restored cannot be pruned underneath it.
    fn safety_backup(&self) -> BackupResult<Option<BackupRecord>> {
        match self.backup_locked(BackupKind::Full) {
            Ok(record) => {
                info!(file = %record.filename, "Safety backup created");
                Ok(Some(record))
            }
            Err(e) if e.is_not_found() => {
                warn!("No live database to protect, skipping safety backup");
                Ok(None)
            }
            Err(e) => Err(BackupError::Restore(format!("Safety backup failed: {}", e))),
        }
    }

    fn scratch_dir(&self, purpose: &str) -> PathBuf {
        unique_path(
            &self.paths.temp_dir(),
            &format!("{}_{}", purpose, Utc::now().format(STAMP_FORMAT)),
            "",
        )
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_backup_record(path: &Path) -> Option<BackupRecord> {
    let filename = path.file_name()?.to_string_lossy().to_string();
    if !is_db_backup_name(&filename) {
        return None;
    }

    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }

    let parsed = parse_db_backup_name(&filename);
    let sidecar = integrity::read_sidecar(path).unwrap_or_else(|e| {
        warn!(file = %filename, error = %e, "Ignoring unreadable checksum sidecar");
        None
    });

    if sidecar.is_none() && !archive::is_archive_path(path) {
        debug!(file = %filename, "Skipping unfinished backup without checksum");
        return None;
    }

    let kind = sidecar
        .as_ref()
        .and_then(|s| s.kind)
        .or(parsed.map(|p| p.kind));
    let created_at = sidecar
        .as_ref()
        .and_then(|s| s.created_at)
        .or(parsed.map(|p| p.created_at));

    let (Some(kind), Some(created_at)) = (kind, created_at) else {
        debug!(file = %filename, "Skipping backup with unparseable name");
        return None;
    };

    Some(BackupRecord {
        path: path.to_path_buf(),
        kind,
        created_at,
        sequence: parsed.map(|p| p.sequence).unwrap_or(0),
        checksum: sidecar.map(|s| s.digest),
        size_bytes: metadata.len(),
        filename,
    })
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn remove_scratch(dir: &Path) {
    if dir.exists() {
        if let Err(e) = fs::remove_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "Failed to clean up temp directory");
        }
    }
}

fn as_creation_error(e: BackupError) -> BackupError {
    match e {
        BackupError::Creation(_) | BackupError::NotFound { .. } => e,
        other => BackupError::Creation(other.to_string()),
    }
}

fn as_restore_error(e: BackupError) -> BackupError {
    match e {
        BackupError::Restore(_) | BackupError::Verification(_) | BackupError::NotFound { .. } => e,
        other => BackupError::Restore(other.to_string()),
    }
}
