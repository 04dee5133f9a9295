//! Atomic filesystem operations for taskman.
//!
//! All atomic writes follow this pattern:
//! 1. Write content to a temporary file in the same directory
//! 2. Sync the file to disk (fsync)
//! 3. Atomically replace the original file with `rename()`
//!
//! Temporary files carry the writer's pid and a random suffix
//! (`.{filename}.{pid}.{rand}.tmp`), so concurrent writers in one or more
//! processes never share a temp file. On crash a temporary file may remain;
//! readers ignore dot-prefixed names.
//!
//! `std::fs::rename` replaces an existing destination on both POSIX and
//! Windows. Source and destination must be on the same filesystem.

use crate::error::{EngineError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically write bytes to a file.
///
/// The target file is never observable in a partial state: readers see either
/// the previous content or the new content.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            EngineError::StoreError(format!(
                "failed to create parent directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = generate_temp_path(path)?;
    write_and_sync(&temp_path, content)?;
    atomic_replace(&temp_path, path)?;

    Ok(())
}

/// Atomically write a string to a file.
pub fn atomic_write_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
    atomic_write(path, content.as_bytes())
}

/// Serialize a value as pretty JSON and write it atomically.
pub fn atomic_write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_vec_pretty(value).map_err(|e| {
        EngineError::StoreError(format!(
            "failed to serialize '{}': {}",
            path.display(),
            e
        ))
    })?;
    atomic_write(path, &json)
}

/// Read and deserialize a JSON document.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn read_json<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<Option<T>> {
    let path = path.as_ref();
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(EngineError::StoreError(format!(
                "failed to read '{}': {}",
                path.display(),
                e
            )));
        }
    };

    serde_json::from_slice(&content).map(Some).map_err(|e| {
        EngineError::StoreError(format!("failed to parse '{}': {}", path.display(), e))
    })
}

/// Generate a temporary file path in the same directory as the target.
fn generate_temp_path(target: &Path) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::StoreError("invalid file path".to_string()))?;

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let temp_name = format!(".{}.{}.{}.tmp", filename, std::process::id(), &suffix[..12]);
    Ok(parent.join(temp_name))
}

/// Write content to a file and sync to disk.
fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| {
        EngineError::StoreError(format!(
            "failed to create temporary file '{}': {}",
            path.display(),
            e
        ))
    })?;

    file.write_all(content).map_err(|e| {
        let _ = fs::remove_file(path);
        EngineError::StoreError(format!("failed to write to temporary file: {}", e))
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(path);
        EngineError::StoreError(format!("failed to sync temporary file to disk: {}", e))
    })?;

    Ok(())
}

/// Atomically replace the target file with the source file.
fn atomic_replace(source: &Path, target: &Path) -> Result<()> {
    fs::rename(source, target).map_err(|e| {
        let _ = fs::remove_file(source);
        EngineError::StoreError(format!(
            "failed to atomically replace '{}': {}",
            target.display(),
            e
        ))
    })?;

    // Persist the directory entry as well
    #[cfg(unix)]
    if let Some(parent) = target.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    Ok(())
}
