//! Lock information structures.

use super::metadata::LockMetadata;
use std::path::PathBuf;

/// Information about a held lock.
#[derive(Debug, Clone)]
pub struct LockInfo {
    /// The resource key.
    pub key: String,

    /// The lock file path; `None` for process-local locks.
    pub path: Option<PathBuf>,

    /// The lock metadata.
    pub metadata: LockMetadata,

    /// Whether the lock is older than the stale threshold.
    pub is_stale: bool,
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (owner: {}, pid: {}, age: {}{})",
            self.key,
            self.metadata.owner,
            self.metadata
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.metadata.age_string(),
            if self.is_stale { ", STALE" } else { "" }
        )
    }
}
