//! File I/O utilities with atomic writes
//!
//! Provides safe file operations that won't corrupt data on failure.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::BackupError;

/// Read JSON from a file, returning `None` if the file doesn't exist
pub fn read_json<T, P>(path: P) -> Result<Option<T>, BackupError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path)
        .map_err(|e| BackupError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map(Some)
        .map_err(|e| BackupError::Json(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write JSON to a file atomically (write to temp, then rename)
///
/// The file is either completely written or not modified at all.
pub fn write_json_atomic<T, P>(path: P, data: &T) -> Result<(), BackupError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    ensure_parent(path)?;

    let temp_path = path.with_extension("json.tmp");

    let file = File::create(&temp_path)
        .map_err(|e| BackupError::Io(format!("Failed to create temp file: {}", e)))?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)
        .map_err(|e| BackupError::Json(format!("Failed to serialize data: {}", e)))?;

    writer
        .flush()
        .map_err(|e| BackupError::Io(format!("Failed to flush data: {}", e)))?;

    writer
        .get_ref()
        .sync_all()
        .map_err(|e| BackupError::Io(format!("Failed to sync data: {}", e)))?;

    rename_or_cleanup(&temp_path, path)
}

/// Write raw bytes to a file atomically
pub fn write_bytes_atomic<P: AsRef<Path>>(path: P, contents: &[u8]) -> Result<(), BackupError> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let temp_path = sibling_temp_path(path);
    let mut file = File::create(&temp_path)
        .map_err(|e| BackupError::Io(format!("Failed to create temp file: {}", e)))?;
    file.write_all(contents)
        .and_then(|_| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            BackupError::Io(format!("Failed to write {}: {}", path.display(), e))
        })?;

    rename_or_cleanup(&temp_path, path)
}

/// Replace `dest` with a copy of `source` without ever leaving `dest` missing
///
/// The copy lands in a temp file next to `dest` and is renamed over it, so a
/// crash mid-copy leaves the original untouched.
pub fn replace_file_atomic(source: &Path, dest: &Path) -> Result<(), BackupError> {
    ensure_parent(dest)?;

    let temp_path = sibling_temp_path(dest);
    copy_synced(source, &temp_path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        BackupError::Io(format!(
            "Failed to stage {} for replacement: {}",
            source.display(),
            e
        ))
    })?;

    rename_or_cleanup(&temp_path, dest)
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> Result<bool, BackupError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BackupError::Io(format!(
            "Failed to delete {}: {}",
            path.display(),
            e
        ))),
    }
}

/// First free path of the form `{base}{ext}`, `{base}-1{ext}`, `{base}-2{ext}`...
pub fn unique_path(dir: &Path, base: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{}{}", base, ext));
    if !first.exists() {
        return first;
    }

    let mut seq = 1u32;
    loop {
        let candidate = dir.join(format!("{}-{}{}", base, seq, ext));
        if !candidate.exists() {
            return candidate;
        }
        seq += 1;
    }
}

fn copy_synced(source: &Path, dest: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(source)?);
    let mut writer = BufWriter::new(File::create(dest)?);
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> Result<(), BackupError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::Io(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

fn rename_or_cleanup(temp_path: &Path, path: &Path) -> Result<(), BackupError> {
    fs::rename(temp_path, path).map_err(|e| {
        let _ = fs::remove_file(temp_path);
        BackupError::Io(format!("Failed to rename temp file: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_read_nonexistent_returns_none() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent.json");

        let data: Option<TestData> = read_json(&path).unwrap();
        assert!(data.is_none());
    }

    #[test]
    fn test_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        write_json_atomic(&path, &data).unwrap();
        let loaded: Option<TestData> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(data));
        assert!(!temp_dir.path().join("test.json.tmp").exists());
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("test.json");

        write_json_atomic(
            &path,
            &TestData {
                name: "n".into(),
                value: 1,
            },
        )
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_read_invalid_json_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, "not json at all").unwrap();

        assert!(read_json::<TestData, _>(&path).is_err());
    }

    #[test]
    fn test_replace_file_atomic() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source.bin");
        let dest = temp_dir.path().join("dest.bin");
        fs::write(&source, b"new contents").unwrap();
        fs::write(&dest, b"old").unwrap();

        replace_file_atomic(&source, &dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"new contents");
        assert!(source.exists());
        assert!(!temp_dir.path().join("dest.bin.tmp").exists());
    }

    #[test]
    fn test_replace_from_missing_source_keeps_dest() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("dest.bin");
        fs::write(&dest, b"keep me").unwrap();

        let result = replace_file_atomic(&temp_dir.path().join("missing"), &dest);
        assert!(result.is_err());
        assert_eq!(fs::read(&dest).unwrap(), b"keep me");
    }

    #[test]
    fn test_unique_path_appends_sequence() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        let first = unique_path(dir, "db_backup_full_20240101_000000", ".db");
        assert_eq!(first, dir.join("db_backup_full_20240101_000000.db"));
        fs::write(&first, b"x").unwrap();

        let second = unique_path(dir, "db_backup_full_20240101_000000", ".db");
        assert_eq!(second, dir.join("db_backup_full_20240101_000000-1.db"));
    }

    #[test]
    fn test_remove_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file");
        fs::write(&path, b"x").unwrap();

        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
    }
}
