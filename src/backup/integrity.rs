//! Integrity verification
//!
//! Each backup file has a `<file>.checksum` sidecar holding its SHA-256
//! digest plus the structured fields also encoded in the filename. The
//! sidecar is the only source of truth for "is this backup intact".
//!
//! Verification is trust-on-first-use: a file seen without a sidecar gets one
//! written from its current bytes and is reported as trusted. Every later
//! check compares against that first digest.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::record::BackupKind;
use crate::error::{BackupError, BackupResult};
use crate::storage::file_io;

/// Suffix of checksum sidecar files
pub const CHECKSUM_EXTENSION: &str = ".checksum";

/// Hash algorithm recorded in sidecars
pub const CHECKSUM_ALGORITHM: &str = "sha256";

const CHUNK_SIZE: usize = 64 * 1024;

/// Contents of a checksum sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecksumSidecar {
    /// Hash algorithm name
    pub algorithm: String,
    /// Lowercase hex digest
    pub digest: String,
    /// Backup kind, when the file is a database backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BackupKind>,
    /// Backup start time, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// File size at the time the digest was taken
    #[serde(default)]
    pub size_bytes: u64,
}

/// Outcome of a successful verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The file matched its existing sidecar
    Matched,
    /// No sidecar existed; one was written from the current bytes
    TrustedOnFirstUse,
}

/// Path of the sidecar belonging to `file`
pub fn sidecar_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(CHECKSUM_EXTENSION);
    PathBuf::from(name)
}

/// Stream a file through SHA-256 in fixed-size chunks
pub fn compute_digest(file: &Path) -> BackupResult<String> {
    let handle = File::open(file).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BackupError::file_not_found(file)
        } else {
            BackupError::Io(format!("Failed to open {}: {}", file.display(), e))
        }
    })?;

    let mut reader = BufReader::with_capacity(CHUNK_SIZE, handle);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| BackupError::Io(format!("Failed to read {}: {}", file.display(), e)))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the digest of `file` and write its sidecar
pub fn stamp(
    file: &Path,
    kind: Option<BackupKind>,
    created_at: Option<DateTime<Utc>>,
) -> BackupResult<ChecksumSidecar> {
    let digest = compute_digest(file)?;
    let size_bytes = std::fs::metadata(file)?.len();

    let sidecar = ChecksumSidecar {
        algorithm: CHECKSUM_ALGORITHM.to_string(),
        digest,
        kind,
        created_at,
        size_bytes,
    };
    file_io::write_json_atomic(sidecar_path(file), &sidecar)?;

    debug!(file = %file.display(), digest = %sidecar.digest, "Checksum written");
    Ok(sidecar)
}

/// Read the sidecar of `file`, if present
///
/// Accepts both the JSON document and a bare hex digest.
pub fn read_sidecar(file: &Path) -> BackupResult<Option<ChecksumSidecar>> {
    let path = sidecar_path(file);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| BackupError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    let trimmed = contents.trim();

    if is_hex_digest(trimmed) {
        return Ok(Some(ChecksumSidecar {
            algorithm: CHECKSUM_ALGORITHM.to_string(),
            digest: trimmed.to_ascii_lowercase(),
            kind: None,
            created_at: None,
            size_bytes: 0,
        }));
    }

    serde_json::from_str(trimmed).map(Some).map_err(|e| {
        BackupError::Verification(format!("Unreadable checksum file {}: {}", path.display(), e))
    })
}

/// Verify `file` against its sidecar
///
/// # Errors
///
/// `NotFound` if the file is missing, `Verification` on a digest mismatch.
pub fn verify(file: &Path) -> BackupResult<Verification> {
    if !file.exists() {
        return Err(BackupError::file_not_found(file));
    }

    let Some(sidecar) = read_sidecar(file)? else {
        warn!(file = %file.display(), "No checksum found, trusting current contents");
        stamp(file, None, None)?;
        return Ok(Verification::TrustedOnFirstUse);
    };

    if sidecar.algorithm != CHECKSUM_ALGORITHM {
        return Err(BackupError::Verification(format!(
            "Unsupported checksum algorithm '{}' for {}",
            sidecar.algorithm,
            file.display()
        )));
    }

    let current = compute_digest(file)?;
    if current == sidecar.digest {
        debug!(file = %file.display(), "Checksum verified");
        Ok(Verification::Matched)
    } else {
        Err(BackupError::Verification(format!(
            "Checksum mismatch for {}: expected {}, found {}",
            file.display(),
            sidecar.digest,
            current
        )))
    }
}

fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}
