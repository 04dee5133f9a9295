//! Task record model.
//!
//! A task record is the durable state of one task instance: which workflow
//! it runs (`task_type`), what it acts upon (`target`), and its continuation
//! (`stage` + `body`). Records are persisted as one JSON document each:
//!
//! ```text
//! {
//!   "id": "5f0c...",
//!   "task_type": "ClouduserSyncstatusTask",
//!   "target": {"keyword": "clouduser", "id": "u-1"},
//!   "stage": "Init",
//!   "status": "running",
//!   "body": {...},
//!   "actor": {"name": "alice", "is_admin": false},
//!   "created_at": "...",
//!   "updated_at": "...",
//!   "version": 3,
//!   "transitions": 2
//! }
//! ```
//!
//! Unknown stage bodies are opaque to the engine; only handlers interpret
//! them.

mod file_store;
mod memory_store;
mod mutations;
mod store;


pub use file_store::FileRecordStore;
pub use memory_store::MemoryRecordStore;
pub use store::RecordStore;

use crate::error::EngineError;
use crate::identity::Identity;
use crate::registry::STAGE_INIT;
use crate::resource::ResourceRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Unique task identifier (UUID v4 string).
pub type TaskId = String;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Persisted, not yet picked up by a dispatch.
    Init,
    /// A stage is in flight or pending redispatch.
    Running,
    /// Terminal success.
    Complete,
    /// Terminal failure.
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Init,
        TaskStatus::Running,
        TaskStatus::Complete,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Init => "init",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        }
    }

    /// Terminal states are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                EngineError::ValidationError(format!(
                    "unknown task status '{}' (expected init, running, complete or failed)",
                    s
                ))
            })
    }
}

fn initial_version() -> u64 {
    1
}

/// Durable state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,

    /// Name of the registered handler set.
    pub task_type: String,

    /// Object the task acts upon.
    pub target: ResourceRef,

    /// Name of the next handler to invoke.
    pub stage: String,

    pub status: TaskStatus,

    /// Payload passed to the next stage; the result or failure reason once
    /// terminal.
    #[serde(default)]
    pub body: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<TaskId>,

    /// Identity that authorized the operation.
    pub actor: Identity,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // =========================================================================
    // Engine bookkeeping
    // =========================================================================
    /// Incremented by every successful write.
    #[serde(default = "initial_version")]
    pub version: u64,

    /// Transitions applied so far.
    #[serde(default)]
    pub transitions: u32,

    /// Earliest time the resume scan may redispatch the current stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,

    /// Current stage only runs after an external event.
    #[serde(default)]
    pub waiting: bool,

    /// On a child: terminal state already delivered to the parent.
    #[serde(default)]
    pub parent_notified: bool,

    /// On a parent: children whose terminal state was delivered.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub seen_children: BTreeSet<TaskId>,
}

impl TaskRecord {
    /// Fresh record in `init` status at the `Init` stage.
    pub fn new(
        task_type: impl Into<String>,
        target: ResourceRef,
        params: Value,
        actor: Identity,
        parent_task_id: Option<TaskId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            target,
            stage: STAGE_INIT.to_string(),
            status: TaskStatus::Init,
            body: params,
            parent_task_id,
            actor,
            created_at: now,
            updated_at: now,
            version: initial_version(),
            transitions: 0,
            next_run_at: None,
            waiting: false,
            parent_notified: false,
            seen_children: BTreeSet::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the resume scan should pick this record up at `now`.
    pub fn is_resumable(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && !self.waiting && self.next_run_at.is_none_or(|at| at <= now)
    }

    /// Terminal child whose parent has not seen the outcome yet.
    pub fn needs_parent_notification(&self) -> bool {
        self.parent_task_id.is_some() && self.is_terminal() && !self.parent_notified
    }
}
