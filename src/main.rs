use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ledger_backup::backup::BackupManager;
use ledger_backup::cli::{handle_backup_command, BackupCommands};
use ledger_backup::config::{AppPaths, ConfigStore};

#[derive(Parser)]
#[command(
    name = "ledger-backup",
    author = "Kaylee Beyene",
    version,
    about = "Backup, restore, and export for a SQLite ledger",
    long_about = "ledger-backup takes full and incremental snapshots of a single-file \
                  SQLite database, checksums and compresses them, keeps a bounded \
                  history, and restores them safely. The application root defaults \
                  to the platform data directory and can be overridden with \
                  LEDGER_BACKUP_ROOT."
)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: BackupCommands,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Initialize paths and settings
    let paths = AppPaths::new()?;
    paths.ensure_directories()?;
    let config = Arc::new(ConfigStore::load(paths.clone())?);

    let manager = BackupManager::from_config(paths, Arc::clone(&config));
    handle_backup_command(&manager, &config, cli.command)?;

    Ok(())
}
