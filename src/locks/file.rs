//! Exclusive-create lock files.
//!
//! The lowest layer of the lock manager, also used by the file record store
//! for its short compare-and-swap guards.

use super::metadata::LockMetadata;
use crate::error::{EngineError, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::warn;

/// Result of a single claim attempt.
#[derive(Debug)]
pub(crate) enum ClaimOutcome {
    /// The file was created and now carries our metadata.
    Acquired,
    /// Someone else holds the file. Their metadata, when readable.
    Held(Option<LockMetadata>),
}

/// Try once to create `path` exclusively and write `metadata` into it.
pub(crate) fn claim_file(path: &Path, metadata: &LockMetadata) -> Result<ClaimOutcome> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            EngineError::StoreError(format!(
                "failed to create lock directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Ok(ClaimOutcome::Held(LockMetadata::from_file(path).ok()));
        }
        Err(e) => {
            return Err(EngineError::StoreError(format!(
                "failed to create lock file '{}': {}",
                path.display(),
                e
            )));
        }
    };

    let json = metadata.to_json()?;
    if let Err(e) = file.write_all(json.as_bytes()).and_then(|_| file.sync_all()) {
        let _ = fs::remove_file(path);
        return Err(EngineError::StoreError(format!(
            "failed to write lock metadata '{}': {}",
            path.display(),
            e
        )));
    }

    Ok(ClaimOutcome::Acquired)
}

/// Remove `path` if it still carries `token`.
///
/// Returns `Ok(false)` when the file is gone or belongs to another token
/// (e.g. it was force-cleared and re-acquired).
pub(crate) fn release_file(path: &Path, token: &str) -> Result<bool> {
    let current = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(EngineError::StoreError(format!(
                "failed to read lock file '{}': {}",
                path.display(),
                e
            )));
        }
    };

    let owned = serde_json::from_str::<LockMetadata>(&current)
        .map(|meta| meta.token == token)
        .unwrap_or(false);
    if !owned {
        return Ok(false);
    }

    fs::remove_file(path).map_err(|e| {
        EngineError::StoreError(format!(
            "failed to release lock '{}': {}",
            path.display(),
            e
        ))
    })?;
    Ok(true)
}

/// Take a stale `path` out of service without racing a fresh claimant.
///
/// The file is first renamed to a private sibling, then `still_stale` is
/// asked about the moved file. Only a confirmed stale file is deleted. A file
/// that turns out to be fresh (re-created between the caller's check and the
/// rename) is linked back into place, which never overwrites a newer claim.
///
/// Returns `Ok(true)` when a stale file was removed.
pub(crate) fn break_stale_file(path: &Path, still_stale: impl Fn(&Path) -> bool) -> Result<bool> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("lock");
    let moved = path.with_file_name(format!(".{}.{}.broken", name, uuid::Uuid::new_v4()));

    match fs::rename(path, &moved) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(EngineError::StoreError(format!(
                "failed to move stale lock '{}': {}",
                path.display(),
                e
            )));
        }
    }

    if still_stale(&moved) {
        fs::remove_file(&moved).map_err(|e| {
            EngineError::StoreError(format!(
                "failed to remove stale lock '{}': {}",
                moved.display(),
                e
            ))
        })?;
        return Ok(true);
    }

    if let Err(e) = fs::hard_link(&moved, path) {
        warn!(path = %path.display(), error = %e, "could not restore live lock file");
    }
    if let Err(e) = fs::remove_file(&moved) {
        warn!(path = %moved.display(), error = %e, "failed to clean up moved lock file");
    }
    Ok(false)
}
