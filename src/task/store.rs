//! Task record store contract.

use super::{TaskRecord, TaskStatus};
use crate::error::Result;

/// Durable keyed table of task records with per-record optimistic
/// versioning.
///
/// Implementations must make `compare_and_swap` atomic with respect to every
/// other writer of the same store, including other processes for shared
/// stores.
pub trait RecordStore: Send + Sync {
    /// Persist a new record. Fails if the id already exists.
    fn create(&self, record: &TaskRecord) -> Result<()>;

    /// Load a record; `None` when the id is unknown.
    fn get(&self, task_id: &str) -> Result<Option<TaskRecord>>;

    /// Replace the stored record if its version still equals
    /// `expected_version`.
    ///
    /// On success the stored record is `record` with `version` set to
    /// `expected_version + 1`, and that stored copy is returned. A mismatch
    /// is [`EngineError::VersionConflict`](crate::error::EngineError); a
    /// missing record is `NotFound`.
    fn compare_and_swap(&self, record: &TaskRecord, expected_version: u64) -> Result<TaskRecord>;

    /// Every record, oldest first.
    fn list(&self) -> Result<Vec<TaskRecord>>;

    /// Records whose status is one of `statuses`, oldest first.
    fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<TaskRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| statuses.contains(&r.status))
            .collect())
    }
}

/// Sort key shared by the store implementations.
pub(super) fn sort_oldest_first(records: &mut [TaskRecord]) {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
