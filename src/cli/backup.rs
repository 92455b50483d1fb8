//! Backup CLI commands
//!
//! Every command prints one human-readable outcome line. Operation failures
//! are reported on stdout and do not change the exit status.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::Subcommand;
use tracing::error;

use crate::backup::{BackupKind, BackupManager, ExportFormat, Verification};
use crate::config::ConfigStore;
use crate::error::{BackupError, BackupResult};

/// Backup subcommands
#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Back up the database
    BackupDb {
        /// Backup type
        #[arg(long = "type", value_enum, default_value_t = BackupKind::Full)]
        kind: BackupKind,
    },

    /// Restore the database from a backup
    RestoreDb {
        /// Backup file (filename in the backup directory, path, or 'latest');
        /// pick interactively when omitted
        #[arg(long)]
        file: Option<String>,
    },

    /// Back up the configuration
    BackupConfig,

    /// Restore the configuration from a backup
    RestoreConfig {
        /// Config backup file; pick interactively when omitted
        #[arg(long)]
        file: Option<String>,
    },

    /// Export tables to a zip of CSV or JSON files
    Export {
        /// Output format
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,

        /// Table to export (repeatable; all tables when omitted)
        #[arg(long = "table")]
        tables: Vec<String>,
    },

    /// Import a CSV/JSON file or an export archive
    Import {
        /// File to import
        #[arg(long)]
        file: PathBuf,

        /// Target table (defaults to the file name without extension)
        #[arg(long)]
        table: Option<String>,
    },

    /// List database and config backups
    List,

    /// Verify a backup against its checksum
    Verify {
        /// Backup file
        #[arg(long)]
        file: String,
    },

    /// Run scheduled backups in the foreground until Enter is pressed
    StartScheduler,

    /// Stop scheduled backups
    StopScheduler,
}

/// Handle a backup command
pub fn handle_backup_command(
    manager: &BackupManager,
    config: &ConfigStore,
    cmd: BackupCommands,
) -> BackupResult<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();

    match cmd {
        BackupCommands::BackupDb { kind } => match manager.backup_database(kind) {
            Ok(record) => {
                println!("Backup created: {}", record.filename);
                println!("Location: {}", record.path.display());
            }
            Err(e) => println!("Backup failed: {}", e),
        },

        BackupCommands::RestoreDb { file } => {
            let path = match file {
                Some(file) => resolve_backup_path(manager, &file),
                None => pick_database_backup(manager, &mut input),
            };
            match path {
                Ok(Some(path)) => match manager.restore_database(&path) {
                    Ok(outcome) => println!("{}", outcome.summary()),
                    Err(e) => println!("Restore failed: {}", e),
                },
                Ok(None) => println!("Restore cancelled."),
                Err(e) => println!("Restore failed: {}", e),
            }
        }

        BackupCommands::BackupConfig => match config.backup() {
            Ok(path) => println!("Config backup created: {}", path.display()),
            Err(e) => println!("Config backup failed: {}", e),
        },

        BackupCommands::RestoreConfig { file } => {
            let path = match file {
                Some(file) => resolve_config_path(config, &file),
                None => pick_config_backup(config, &mut input),
            };
            match path {
                Ok(Some(path)) => match config.restore(&path) {
                    Ok(()) => println!("Config restored from {}", path.display()),
                    Err(e) => println!("Config restore failed: {}", e),
                },
                Ok(None) => println!("Restore cancelled."),
                Err(e) => println!("Config restore failed: {}", e),
            }
        }

        BackupCommands::Export { format, tables } => {
            let tables = (!tables.is_empty()).then_some(tables);
            match manager.export_data(format, tables.as_deref()) {
                Ok(summary) => match summary.archive {
                    Some(archive) => {
                        println!(
                            "Exported {} table(s) to {}",
                            summary.tables.len(),
                            archive.display()
                        );
                        if !summary.skipped.is_empty() {
                            println!("Skipped empty: {}", summary.skipped.join(", "));
                        }
                    }
                    None => println!("Nothing to export: all selected tables are empty."),
                },
                Err(e) => println!("Export failed: {}", e),
            }
        }

        BackupCommands::Import { file, table } => {
            match manager.import_data(&file, table.as_deref()) {
                Ok(summary) => {
                    println!(
                        "Imported {} row(s) into {} table(s)",
                        summary.total_rows(),
                        summary.tables.len()
                    );
                    for (table, rows) in &summary.tables {
                        println!("  {}: {}", table, rows);
                    }
                }
                Err(e) => println!("Import failed: {}", e),
            }
        }

        BackupCommands::List => list_backups(manager, config)?,

        BackupCommands::Verify { file } => {
            let path = resolve_backup_path(manager, &file)
                .ok()
                .flatten()
                .unwrap_or_else(|| PathBuf::from(&file));
            match manager.verify_backup(&path) {
                Ok(Verification::Matched) => println!("Backup verified: {}", path.display()),
                Ok(Verification::TrustedOnFirstUse) => println!(
                    "No checksum found for {}; one was created from its current contents",
                    path.display()
                ),
                Err(e) => println!("Verification failed: {}", e),
            }
        }

        BackupCommands::StartScheduler => match manager.start_scheduler() {
            Ok(started) => {
                if started {
                    println!(
                        "Scheduler started: full backup every {} day(s).",
                        manager.retention().interval_days.max(1)
                    );
                } else {
                    println!("Scheduler is already running.");
                }
                println!("Press Enter to stop.");
                let mut line = String::new();
                if let Err(e) = input.read_line(&mut line) {
                    error!(error = %e, "Failed to read from stdin");
                }
                if manager.stop_scheduler() {
                    println!("Scheduler stopped.");
                } else {
                    println!("Scheduler did not stop in time; exiting anyway.");
                }
            }
            Err(e) => println!("Scheduler not started: {}", e),
        },

        BackupCommands::StopScheduler => {
            if manager.is_scheduler_running() {
                manager.stop_scheduler();
                println!("Scheduler stopped.");
            } else {
                println!("No scheduler is running.");
            }
        }
    }

    Ok(())
}

fn list_backups(manager: &BackupManager, config: &ConfigStore) -> BackupResult<()> {
    let backups = manager.list_backups(None)?;

    println!("Database Backups");
    println!("================");
    if backups.is_empty() {
        println!("  No backups found.");
        println!("  Create one with: ledger-backup backup-db");
    }
    for (i, backup) in backups.iter().enumerate() {
        let age = chrono::Utc::now().signed_duration_since(backup.created_at);
        println!(
            "  {}. {} [{}] ({} ago, {})",
            i + 1,
            backup.filename,
            backup.kind,
            format_duration(age),
            format_size(backup.size_bytes),
        );
    }

    let config_backups = config.list_backups()?;
    println!();
    println!("Config Backups");
    println!("==============");
    if config_backups.is_empty() {
        println!("  No backups found.");
    }
    for (i, backup) in config_backups.iter().enumerate() {
        let age = chrono::Utc::now().signed_duration_since(backup.created_at);
        println!(
            "  {}. {} ({} ago, {})",
            i + 1,
            backup.filename,
            format_duration(age),
            format_size(backup.size_bytes),
        );
    }

    println!();
    println!(
        "Total: {} database, {} config backup(s)",
        backups.len(),
        config_backups.len()
    );
    Ok(())
}

fn pick_database_backup(
    manager: &BackupManager,
    input: &mut impl BufRead,
) -> BackupResult<Option<PathBuf>> {
    let backups = manager.list_backups(None)?;
    let labels: Vec<String> = backups
        .iter()
        .map(|b| {
            format!(
                "{} [{}] {}",
                b.filename,
                b.kind,
                b.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            )
        })
        .collect();

    Ok(pick_from_list("database backup", &labels, input)?.map(|i| backups[i].path.clone()))
}

fn pick_config_backup(
    config: &ConfigStore,
    input: &mut impl BufRead,
) -> BackupResult<Option<PathBuf>> {
    let backups = config.list_backups()?;
    let labels: Vec<String> = backups.iter().map(|b| b.filename.clone()).collect();

    Ok(pick_from_list("config backup", &labels, input)?.map(|i| backups[i].path.clone()))
}

/// Print a numbered menu and read a choice; `None` on 0, blank, or EOF
fn pick_from_list(
    what: &str,
    labels: &[String],
    input: &mut impl BufRead,
) -> BackupResult<Option<usize>> {
    if labels.is_empty() {
        return Err(BackupError::NotFound {
            entity_type: "Backup",
            identifier: what.to_string(),
        });
    }

    println!("Available {}s:", what);
    for (i, label) in labels.iter().enumerate() {
        println!("  {}. {}", i + 1, label);
    }
    print!("Select a {} (1-{}, 0 to cancel): ", what, labels.len());
    io::stdout().flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    match line.parse::<usize>() {
        Ok(0) => Ok(None),
        Ok(n) if n <= labels.len() => Ok(Some(n - 1)),
        _ => Err(BackupError::Config(format!("Invalid selection: {}", line))),
    }
}

/// Resolve a backup identifier to a full path
fn resolve_backup_path(manager: &BackupManager, backup: &str) -> BackupResult<Option<PathBuf>> {
    if backup.eq_ignore_ascii_case("latest") {
        return manager
            .list_backups(None)?
            .into_iter()
            .next()
            .map(|b| Some(b.path))
            .ok_or_else(|| BackupError::NotFound {
                entity_type: "Backup",
                identifier: "latest".to_string(),
            });
    }

    Ok(Some(resolve_in_dir(
        &manager.paths().db_backup_dir(),
        backup,
        &[".db.zip", ".db"],
    )))
}

fn resolve_config_path(config: &ConfigStore, backup: &str) -> BackupResult<Option<PathBuf>> {
    if backup.eq_ignore_ascii_case("latest") {
        return config
            .list_backups()?
            .into_iter()
            .next()
            .map(|b| Some(b.path))
            .ok_or_else(|| BackupError::NotFound {
                entity_type: "Config backup",
                identifier: "latest".to_string(),
            });
    }

    Ok(Some(resolve_in_dir(
        &config.paths().config_backup_dir(),
        backup,
        &[".yaml"],
    )))
}

/// A path as given if it exists, else the same name inside `dir` (with one of
/// `extensions` appended if needed), else the path as given
fn resolve_in_dir(dir: &Path, name: &str, extensions: &[&str]) -> PathBuf {
    let path = PathBuf::from(name);
    if path.exists() {
        return path;
    }

    let in_dir = dir.join(name);
    if in_dir.exists() {
        return in_dir;
    }

    extensions
        .iter()
        .map(|ext| dir.join(format!("{}{}", name, ext)))
        .find(|p| p.exists())
        .unwrap_or(path)
}

/// Format a duration in human-readable form
fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    let months = days / 30;
    format!("{}mo", months)
}

/// Format a file size in human-readable form
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn labels() -> Vec<String> {
        vec!["a".into(), "b".into(), "c".into()]
    }

    #[test]
    fn test_pick_from_list() {
        let mut input = Cursor::new("2\n");
        assert_eq!(pick_from_list("backup", &labels(), &mut input).unwrap(), Some(1));

        let mut cancel = Cursor::new("0\n");
        assert_eq!(pick_from_list("backup", &labels(), &mut cancel).unwrap(), None);

        let mut eof = Cursor::new("");
        assert_eq!(pick_from_list("backup", &labels(), &mut eof).unwrap(), None);

        let mut out_of_range = Cursor::new("7\n");
        assert!(pick_from_list("backup", &labels(), &mut out_of_range).is_err());

        let mut nothing = Cursor::new("1\n");
        assert!(pick_from_list("backup", &[], &mut nothing)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_resolve_in_dir() {
        let temp_dir = TempDir::new().unwrap();
        let backup = temp_dir.path().join("db_backup_full_20240101_000000.db.zip");
        fs::write(&backup, b"zip").unwrap();

        assert_eq!(
            resolve_in_dir(temp_dir.path(), "db_backup_full_20240101_000000.db.zip", &[]),
            backup
        );
        assert_eq!(
            resolve_in_dir(temp_dir.path(), "db_backup_full_20240101_000000", &[".db.zip"]),
            backup
        );
        assert_eq!(
            resolve_in_dir(temp_dir.path(), "missing.db", &[".db.zip"]),
            PathBuf::from("missing.db")
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::minutes(90)), "1h");
        assert_eq!(format_duration(chrono::Duration::days(3)), "3d");
        assert_eq!(format_duration(chrono::Duration::days(65)), "2mo");
    }
}
