//! In-memory record store for tests and single-process embedding.

use super::store::{RecordStore, sort_oldest_first};
use super::TaskRecord;
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<MutexGuard<'_, HashMap<String, TaskRecord>>> {
        self.records
            .lock()
            .map_err(|_| EngineError::StoreError("record table poisoned".to_string()))
    }
}

impl RecordStore for MemoryRecordStore {
    fn create(&self, record: &TaskRecord) -> Result<()> {
        let mut records = self.records()?;
        if records.contains_key(&record.id) {
            return Err(EngineError::StoreError(format!(
                "task '{}' already exists",
                record.id
            )));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        Ok(self.records()?.get(task_id).cloned())
    }

    fn compare_and_swap(&self, record: &TaskRecord, expected_version: u64) -> Result<TaskRecord> {
        let mut records = self.records()?;
        let current = records
            .get_mut(&record.id)
            .ok_or_else(|| EngineError::NotFound(record.id.clone()))?;

        if current.version != expected_version {
            return Err(EngineError::VersionConflict {
                task_id: record.id.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut stored = record.clone();
        stored.version = expected_version + 1;
        *current = stored.clone();
        Ok(stored)
    }

    fn list(&self) -> Result<Vec<TaskRecord>> {
        let mut records: Vec<_> = self.records()?.values().cloned().collect();
        sort_oldest_first(&mut records);
        Ok(records)
    }
}
