//! Synchronous drive of a task to its terminal state.

use super::{NewTask, TaskEngine};
use crate::call::CallContext;
use crate::error::{EngineError, Result};
use crate::task::TaskStatus;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

impl TaskEngine {
    /// Create a task and drive it to completion on the calling thread.
    ///
    /// Returns the completion result, or the failure reason as
    /// [`EngineError::TaskFailed`].
    pub fn run_task(&self, ctx: &CallContext, request: NewTask) -> Result<Value> {
        let record = self.create(request)?;
        self.invoke(ctx, &record.id)
    }

    /// Drive an existing task until it is terminal.
    ///
    /// Delayed stages are slept on; stages waiting for an external event
    /// (and tasks dispatched elsewhere) are polled every `resume_interval`.
    /// Cancellation or the deadline yields [`EngineError::Timeout`].
    pub fn invoke(&self, ctx: &CallContext, task_id: &str) -> Result<Value> {
        let poll = self.config.resume_interval();
        loop {
            let record = self.get(task_id)?;
            match record.status {
                TaskStatus::Complete => return Ok(record.body),
                TaskStatus::Failed => return Err(EngineError::TaskFailed(record.body)),
                TaskStatus::Init | TaskStatus::Running => {}
            }

            if ctx.is_done() {
                return Err(EngineError::Timeout(format!(
                    "task {} still {} at stage '{}' ({})",
                    task_id,
                    record.status,
                    record.stage,
                    ctx.done_reason()
                )));
            }

            if record.waiting {
                ctx.sleep(poll);
                continue;
            }
            if let Some(at) = record.next_run_at {
                let wait = (at - Utc::now()).to_std().unwrap_or_default();
                if !wait.is_zero() {
                    debug!(task_id, wait_ms = wait.as_millis() as u64, "waiting for delayed stage");
                    ctx.sleep(wait.min(poll));
                    continue;
                }
            }

            if self.dispatch(task_id)?.is_skipped() {
                ctx.sleep(poll);
            }
        }
    }
}
