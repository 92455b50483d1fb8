//! Zip archiving for backups and exports
//!
//! Backup archives hold exactly one entry. [`extract`] enforces that: an
//! archive with zero or several entries is rejected rather than silently
//! yielding its first member. Export archives hold one file per table and go
//! through [`compress_files`] / [`extract_all`] instead.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::record::ARCHIVE_EXTENSION;
use crate::error::{BackupError, BackupResult};

/// Whether a path names a zip archive, by extension in any case
pub fn is_archive_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION.trim_start_matches('.')))
}

/// Compress a single file into `<file>.zip`
///
/// The caller owns the original and deletes it once the archive exists.
pub fn compress(file: &Path) -> BackupResult<PathBuf> {
    let mut archive_name = file.as_os_str().to_os_string();
    archive_name.push(ARCHIVE_EXTENSION);
    let archive = PathBuf::from(archive_name);

    compress_files(&[file.to_path_buf()], &archive)?;
    Ok(archive)
}

/// Write `files` into a new archive at `archive`, one entry per file
///
/// Entries are named by file name only. A partially written archive is
/// removed on failure.
pub fn compress_files(files: &[PathBuf], archive: &Path) -> BackupResult<()> {
    write_archive(files, archive).map_err(|e| {
        let _ = fs::remove_file(archive);
        e
    })?;

    debug!(archive = %archive.display(), entries = files.len(), "Archive written");
    Ok(())
}

fn write_archive(files: &[PathBuf], archive: &Path) -> BackupResult<()> {
    let out = File::create(archive).map_err(|e| {
        BackupError::Archive(format!("Failed to create {}: {}", archive.display(), e))
    })?;
    let mut zip = ZipWriter::new(BufWriter::new(out));

    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                BackupError::Archive(format!("Cannot archive {}: no file name", file.display()))
            })?;
        let size = fs::metadata(file)
            .map_err(|e| BackupError::Archive(format!("Cannot read {}: {}", file.display(), e)))?
            .len();

        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size > u32::MAX as u64);
        zip.start_file(name, options)?;

        let mut reader = BufReader::new(File::open(file)?);
        io::copy(&mut reader, &mut zip)?;
    }

    let writer = zip.finish()?;
    writer
        .into_inner()
        .map_err(|e| BackupError::Archive(format!("Failed to flush archive: {}", e)))?
        .sync_all()?;

    Ok(())
}

/// Names of the entries in an archive
pub fn entry_names(archive: &Path) -> BackupResult<Vec<String>> {
    let zip = open_archive(archive)?;
    Ok(zip.file_names().map(String::from).collect())
}

/// Extract the single entry of a backup archive into `dest_dir`
///
/// # Errors
///
/// Fails with an `Archive` error when the archive does not contain exactly
/// one file entry.
pub fn extract(archive: &Path, dest_dir: &Path) -> BackupResult<PathBuf> {
    let mut zip = open_archive(archive)?;

    if zip.len() != 1 {
        return Err(BackupError::Archive(format!(
            "Expected a single-entry backup archive, {} has {} entries",
            archive.display(),
            zip.len()
        )));
    }

    let extracted = extract_entry(&mut zip, 0, dest_dir)?.ok_or_else(|| {
        BackupError::Archive(format!("{} contains only a directory", archive.display()))
    })?;

    debug!(archive = %archive.display(), file = %extracted.display(), "Archive extracted");
    Ok(extracted)
}

/// Extract every file entry of an archive into `dest_dir`
pub fn extract_all(archive: &Path, dest_dir: &Path) -> BackupResult<Vec<PathBuf>> {
    let mut zip = open_archive(archive)?;
    let mut extracted = Vec::with_capacity(zip.len());

    for index in 0..zip.len() {
        if let Some(path) = extract_entry(&mut zip, index, dest_dir)? {
            extracted.push(path);
        }
    }

    Ok(extracted)
}

fn open_archive(archive: &Path) -> BackupResult<ZipArchive<BufReader<File>>> {
    if !archive.exists() {
        return Err(BackupError::file_not_found(archive));
    }

    let file = File::open(archive)?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| {
        BackupError::Archive(format!("Failed to read {}: {}", archive.display(), e))
    })
}

/// Extract one entry, flattened to its file name. Returns `None` for
/// directory entries.
fn extract_entry(
    zip: &mut ZipArchive<BufReader<File>>,
    index: usize,
    dest_dir: &Path,
) -> BackupResult<Option<PathBuf>> {
    let mut entry = zip.by_index(index)?;
    if entry.is_dir() {
        return Ok(None);
    }

    let file_name = entry
        .enclosed_name()
        .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        .ok_or_else(|| BackupError::Archive(format!("Unsafe entry name: {}", entry.name())))?;

    fs::create_dir_all(dest_dir)?;
    let target = dest_dir.join(file_name);
    let mut out = BufWriter::new(File::create(&target)?);
    io::copy(&mut entry, &mut out)?;

    Ok(Some(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_compress_and_extract() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("db_backup_full_20240101_000000.db");
        fs::write(&source, b"sqlite bytes".repeat(100)).unwrap();

        let archive = compress(&source).unwrap();
        assert_eq!(
            archive,
            temp_dir.path().join("db_backup_full_20240101_000000.db.zip")
        );
        assert_eq!(
            entry_names(&archive).unwrap(),
            vec!["db_backup_full_20240101_000000.db"]
        );

        let out_dir = temp_dir.path().join("out");
        let extracted = extract(&archive, &out_dir).unwrap();
        assert_eq!(extracted, out_dir.join("db_backup_full_20240101_000000.db"));
        assert_eq!(fs::read(&extracted).unwrap(), fs::read(&source).unwrap());
    }

    #[test]
    fn test_archive_detection_ignores_case() {
        assert!(is_archive_path(Path::new("db_backup_full_20240101_000000.db.zip")));
        assert!(is_archive_path(Path::new("BACKUP.DB.ZIP")));
        assert!(!is_archive_path(Path::new("db_backup_full_20240101_000000.db")));
        assert!(!is_archive_path(Path::new("zip")));
    }

    #[test]
    fn test_extract_rejects_multi_entry_archive() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.csv");
        let b = temp_dir.path().join("b.csv");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"y").unwrap();
        let archive = temp_dir.path().join("both.zip");
        compress_files(&[a, b], &archive).unwrap();

        let err = extract(&archive, &temp_dir.path().join("out")).unwrap_err();
        assert!(matches!(err, BackupError::Archive(_)));

        let all = extract_all(&archive, &temp_dir.path().join("all")).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_extract_rejects_path_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("evil.zip");
        {
            let mut zip = ZipWriter::new(File::create(&archive).unwrap());
            zip.start_file("../escape.db", FileOptions::default()).unwrap();
            zip.write_all(b"boom").unwrap();
            zip.finish().unwrap();
        }

        let err = extract(&archive, &temp_dir.path().join("out")).unwrap_err();
        assert!(matches!(err, BackupError::Archive(_)));
        assert!(!temp_dir.path().join("escape.db").exists());
    }

    #[test]
    fn test_extract_missing_archive() {
        let temp_dir = TempDir::new().unwrap();
        let err = extract(&temp_dir.path().join("none.zip"), temp_dir.path()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_extract_non_zip_fails() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("fake.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        assert!(extract(&archive, temp_dir.path()).is_err());
    }
}
