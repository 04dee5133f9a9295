//! Handle given to stage handlers.

use super::{NewTask, TaskEngine};
use crate::call::CallContext;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::identity::Identity;
use crate::locks::{LockGuard, LockManager};
use crate::resource::ResourceRef;
use crate::task::{TaskId, TaskRecord};
use serde_json::Value;
use std::sync::Arc;

/// Everything a stage handler may know about its task, plus access to the
/// engine and the lock manager.
pub struct TaskContext {
    engine: Arc<TaskEngine>,
    task_id: TaskId,
    task_type: String,
    target: ResourceRef,
    stage: String,
    actor: Identity,
    parent_task_id: Option<TaskId>,
    transitions: u32,
}

impl TaskContext {
    pub(super) fn new(engine: Arc<TaskEngine>, record: &TaskRecord) -> Self {
        Self {
            engine,
            task_id: record.id.clone(),
            task_type: record.task_type.clone(),
            target: record.target.clone(),
            stage: record.stage.clone(),
            actor: record.actor.clone(),
            parent_task_id: record.parent_task_id.clone(),
            transitions: record.transitions,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn target(&self) -> &ResourceRef {
        &self.target
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn actor(&self) -> &Identity {
        &self.actor
    }

    pub fn parent_task_id(&self) -> Option<&str> {
        self.parent_task_id.as_deref()
    }

    /// Transitions applied before this stage ran.
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    pub fn engine(&self) -> &Arc<TaskEngine> {
        &self.engine
    }

    pub fn locks(&self) -> &LockManager {
        self.engine.locks()
    }

    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }

    /// Take the lock on this task's target, waiting at most the configured
    /// default lock timeout.
    pub fn lock_target(&self) -> Result<LockGuard> {
        let call = CallContext::with_timeout(self.config().default_lock_timeout());
        self.locks().lock_object(&call, &self.target)
    }

    /// Create a sub-task whose terminal state is delivered back to this
    /// task's `OnChildComplete` / `OnChildFailed` stage.
    pub fn spawn_child(
        &self,
        task_type: &str,
        target: ResourceRef,
        params: Value,
    ) -> Result<TaskId> {
        self.engine.new_task(
            NewTask::new(task_type, target, params, self.actor.clone())
                .with_parent(self.task_id.clone()),
        )
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("task_type", &self.task_type)
            .field("target", &self.target)
            .field("stage", &self.stage)
            .finish()
    }
}
