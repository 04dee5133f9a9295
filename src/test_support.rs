//! Fixtures shared by the command tests.

use serde_json::Value;
use taskman::context::StateContext;
use taskman::identity::Identity;
use taskman::resource::ResourceRef;
use taskman::task::{FileRecordStore, RecordStore, TaskRecord, TaskStatus};
use taskman::config::EngineConfig;
use tempfile::TempDir;

/// Create an initialized, empty state directory.
pub(crate) fn create_test_state() -> (TempDir, StateContext) {
    let temp_dir = TempDir::new().unwrap();
    let layout = StateContext::resolve_from(temp_dir.path().join("state")).unwrap();
    layout.ensure_dirs().unwrap();
    (temp_dir, layout)
}

/// Persist a record in `status` directly, bypassing the engine.
pub(crate) fn seed_task(layout: &StateContext, task_type: &str, status: TaskStatus) -> TaskRecord {
    let store = FileRecordStore::open(layout, &EngineConfig::default()).unwrap();
    let mut record = TaskRecord::new(
        task_type,
        ResourceRef::new("server", "s1"),
        Value::Null,
        Identity::user("alice"),
        None,
    );
    record.status = status;
    store.create(&record).unwrap();
    record
}
