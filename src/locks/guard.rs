//! RAII lock guard implementation.

use super::file::release_file;
use super::manager::LockTable;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Proof of exclusive ownership of one resource key.
///
/// When dropped, the lock is released: the lock file (if any) is deleted
/// when it still carries this guard's token, and the next in-process waiter
/// is woken. If deletion fails, a warning is logged but no panic occurs.
#[derive(Debug)]
pub struct LockGuard {
    table: Arc<LockTable>,
    key: String,
    ticket: u64,
    token: String,
    path: Option<PathBuf>,
    released: bool,
}

impl LockGuard {
    pub(super) fn new(
        table: Arc<LockTable>,
        key: String,
        ticket: u64,
        token: String,
        path: Option<PathBuf>,
    ) -> Self {
        Self {
            table,
            key,
            ticket,
            token,
            path,
            released: false,
        }
    }

    /// The resource key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Token written into the lock file.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Lock file path; `None` for process-local locks.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Manually release the lock, surfacing file removal errors.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        let result = self.release_file();
        self.table.finish(&self.key, self.ticket);
        result
    }

    fn release_file(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !release_file(path, &self.token)? {
            warn!(
                key = %self.key,
                path = %path.display(),
                "lock file was cleared or taken over before release"
            );
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.release_file() {
            warn!(key = %self.key, error = %e, "failed to release lock");
        }
        self.table.finish(&self.key, self.ticket);
    }
}
