//! File-backed record store.
//!
//! One JSON document per task under `tasks/`. Writes go through the atomic
//! temp-file + rename helper, so readers always see a complete document.
//! `create` and `compare_and_swap` run under a short exclusive-create guard
//! file (`<id>.json.guard`) which makes read-compare-write atomic across
//! processes sharing the directory.

use super::store::{RecordStore, sort_oldest_first};
use super::TaskRecord;
use crate::config::EngineConfig;
use crate::context::StateContext;
use crate::error::{EngineError, Result};
use crate::fs::{atomic_write_json, read_json};
use crate::locks::{ClaimOutcome, LockMetadata, break_stale_file, claim_file, release_file};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const GUARD_RETRY_INTERVAL: Duration = Duration::from_millis(2);
/// Multiple of the guard timeout after which a guard counts as abandoned.
const GUARD_STALE_FACTOR: u32 = 4;

#[derive(Debug, Clone)]
pub struct FileRecordStore {
    layout: StateContext,
    guard_timeout: Duration,
}

/// Held compare-and-swap guard; removed on drop.
struct RecordGuard {
    path: PathBuf,
    token: String,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        if let Err(e) = release_file(&self.path, &self.token) {
            warn!(path = %self.path.display(), error = %e, "failed to release record guard");
        }
    }
}

impl FileRecordStore {
    pub fn open(layout: &StateContext, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        layout.ensure_dirs()?;
        Ok(Self {
            layout: layout.clone(),
            guard_timeout: config.record_guard_timeout(),
        })
    }

    /// Take the guard for `task_id`.
    ///
    /// Guards are held for one read-compare-write. Waiters give up after the
    /// guard timeout, but a guard is only broken once it is
    /// `GUARD_STALE_FACTOR` times older than that, so a slow live writer is
    /// never mistaken for a dead one.
    fn guard(&self, task_id: &str) -> Result<RecordGuard> {
        let path = self.layout.task_guard_path(task_id);
        let metadata = LockMetadata::new(&format!("task::{}", task_id));
        let deadline = Instant::now() + self.guard_timeout;
        let stale_after = self.guard_timeout * GUARD_STALE_FACTOR;
        let is_stale = |p: &Path| guard_age(p).is_some_and(|age| age > stale_after);

        loop {
            match claim_file(&path, &metadata)? {
                ClaimOutcome::Acquired => {
                    return Ok(RecordGuard {
                        path,
                        token: metadata.token,
                    });
                }
                ClaimOutcome::Held(holder) if is_stale(&path) => {
                    let owner = holder.map_or_else(|| "unknown".to_string(), |h| h.owner);
                    if break_stale_file(&path, &is_stale)? {
                        warn!(task_id, owner = %owner, "broke stale record guard");
                    }
                    continue;
                }
                ClaimOutcome::Held(_) => {}
            }

            if Instant::now() >= deadline {
                return Err(EngineError::StoreError(format!(
                    "timed out waiting for record guard '{}'",
                    path.display()
                )));
            }
            thread::sleep(GUARD_RETRY_INTERVAL);
        }
    }
}

/// Age of the guard file at `path`.
///
/// Uses the recorded creation time, or the file's modification time when the
/// metadata is empty or torn. `None` when the file is gone.
fn guard_age(path: &Path) -> Option<Duration> {
    if let Ok(holder) = LockMetadata::from_file(path) {
        return Some(holder.age().to_std().unwrap_or(Duration::ZERO));
    }
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.elapsed().unwrap_or(Duration::ZERO))
}

impl RecordStore for FileRecordStore {
    fn create(&self, record: &TaskRecord) -> Result<()> {
        let _guard = self.guard(&record.id)?;
        let path = self.layout.task_path(&record.id);
        if path.exists() {
            return Err(EngineError::StoreError(format!(
                "task '{}' already exists",
                record.id
            )));
        }
        atomic_write_json(&path, record)
    }

    fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        read_json(self.layout.task_path(task_id))
    }

    fn compare_and_swap(&self, record: &TaskRecord, expected_version: u64) -> Result<TaskRecord> {
        let _guard = self.guard(&record.id)?;
        let path = self.layout.task_path(&record.id);

        let current: TaskRecord =
            read_json(&path)?.ok_or_else(|| EngineError::NotFound(record.id.clone()))?;
        if current.version != expected_version {
            debug!(
                task_id = %record.id,
                expected = expected_version,
                actual = current.version,
                "record version mismatch"
            );
            return Err(EngineError::VersionConflict {
                task_id: record.id.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut stored = record.clone();
        stored.version = expected_version + 1;
        atomic_write_json(&path, &stored)?;
        Ok(stored)
    }

    fn list(&self) -> Result<Vec<TaskRecord>> {
        let dir = &self.layout.tasks_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(dir).map_err(|e| {
            EngineError::StoreError(format!(
                "failed to read tasks directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                EngineError::StoreError(format!("failed to read tasks directory entry: {}", e))
            })?;
            let path = entry.path();

            let is_record = path.extension().and_then(|e| e.to_str()) == Some("json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if !is_record {
                continue;
            }

            match read_json::<_, TaskRecord>(&path) {
                Ok(Some(record)) => records.push(record),
                // Removed between listing and reading.
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable task record"),
            }
        }

        sort_oldest_first(&mut records);
        Ok(records)
    }
}
