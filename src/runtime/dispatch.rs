//! Stage dispatch, transition commit and parent notification.

use super::{DispatchReport, Outcome, Schedule, TaskContext, TaskEngine};
use crate::error::{EngineError, Result};
use crate::events::EventAction;
use crate::registry::{STAGE_ON_CHILD_COMPLETE, STAGE_ON_CHILD_FAILED};
use crate::task::{TaskId, TaskRecord, TaskStatus};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts at a compare-and-swap that keeps losing to other writers.
const NOTIFY_ATTEMPTS: usize = 8;

impl TaskEngine {
    /// Run the task's current stage and apply the outcome, chaining stages
    /// that are scheduled to run immediately.
    ///
    /// A terminal task is not run again; an outstanding child notification
    /// is delivered instead.
    pub fn dispatch(&self, task_id: &str) -> Result<DispatchReport> {
        let Some(_in_flight) = self.claim(task_id) else {
            debug!(task_id, "dispatch skipped, already in flight");
            return Ok(DispatchReport::Skipped {
                task_id: task_id.to_string(),
            });
        };

        let mut steps = 0;
        loop {
            let mut record = self.get(task_id)?;

            if record.is_terminal() {
                if let Some(parent_id) = self.notify_parent(&record)? {
                    self.spawn_dispatch(parent_id);
                }
                return Ok(settled(&record, steps));
            }

            if record.status == TaskStatus::Init {
                match self.start(&record) {
                    Ok(started) => record = started,
                    Err(EngineError::VersionConflict { .. }) => {
                        return Ok(DispatchReport::Conflict {
                            task_id: task_id.to_string(),
                            steps,
                        });
                    }
                    Err(e) => return Err(e),
                }
            }

            let outcome = self.run_stage(&record)?;
            steps += 1;

            let stored = match self.commit(&record, outcome) {
                Ok(stored) => stored,
                Err(EngineError::VersionConflict { expected, actual, .. }) => {
                    warn!(
                        task_id,
                        stage = %record.stage,
                        expected,
                        actual,
                        "transition_conflict: outcome discarded"
                    );
                    return Ok(DispatchReport::Conflict {
                        task_id: task_id.to_string(),
                        steps,
                    });
                }
                Err(e) => return Err(e),
            };

            if stored.is_terminal() {
                if let Some(parent_id) = self.notify_parent(&stored)? {
                    self.spawn_dispatch(parent_id);
                }
                return Ok(settled(&stored, steps));
            }
            if stored.waiting {
                if self.deliver_deferred_child(&stored)? {
                    continue;
                }
                return Ok(settled(&stored, steps));
            }
            if stored.next_run_at.is_some() {
                return Ok(settled(&stored, steps));
            }
        }
    }

    /// Deliver one finished child whose event was deferred while `parent`
    /// was busy. Returns `true` when the parent was transitioned.
    fn deliver_deferred_child(&self, parent: &TaskRecord) -> Result<bool> {
        let pending = self.store.list()?.into_iter().filter(|r| {
            r.parent_task_id.as_deref() == Some(parent.id.as_str()) && r.needs_parent_notification()
        });
        for child in pending {
            if self.notify_parent(&child)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Invoke the handler for the record's current stage.
    ///
    /// Structural problems (runaway cycles, unknown stages, panics) and
    /// handler errors all become a `Fail` outcome.
    fn run_stage(&self, record: &TaskRecord) -> Result<Outcome> {
        if record.transitions >= self.config.max_transitions {
            let err = EngineError::InternalError(format!(
                "transition limit {} reached at stage '{}'",
                self.config.max_transitions, record.stage
            ));
            return Ok(Outcome::Fail(err.to_reason()));
        }

        let Some(handler) = self.registry.handler(&record.task_type, &record.stage) else {
            let err = EngineError::InternalError(format!(
                "unknown stage '{}' for task type '{}'",
                record.stage, record.task_type
            ));
            warn!(task_id = %record.id, stage = %record.stage, "no handler for stage");
            return Ok(Outcome::Fail(err.to_reason()));
        };

        let ctx = TaskContext::new(self.arc()?, record);
        debug!(task_id = %record.id, task_type = %record.task_type, stage = %record.stage, "running stage");

        let result = catch_unwind(AssertUnwindSafe(|| handler.run(&ctx, record.body.clone())));
        Ok(match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                debug!(task_id = %record.id, stage = %record.stage, error = %e, "stage handler failed");
                Outcome::Fail(e.to_reason())
            }
            Err(payload) => {
                let err = EngineError::InternalError(format!(
                    "stage '{}' panicked: {}",
                    record.stage,
                    panic_message(payload.as_ref())
                ));
                warn!(task_id = %record.id, stage = %record.stage, error = %err, "stage handler panicked");
                Outcome::Fail(err.to_reason())
            }
        })
    }

    fn start(&self, record: &TaskRecord) -> Result<TaskRecord> {
        let mut next = record.clone();
        next.start();
        let stored = self.store.compare_and_swap(&next, record.version)?;
        self.emit(
            &stored,
            EventAction::StageAdvance,
            json!({"from": null, "to": stored.stage, "status": stored.status}),
        );
        Ok(stored)
    }

    /// Persist the transition for `outcome` against the version of `record`
    /// and audit it.
    pub(super) fn commit(&self, record: &TaskRecord, outcome: Outcome) -> Result<TaskRecord> {
        let mut next = record.clone();
        let (action, details) = match outcome {
            Outcome::Advance {
                stage,
                body,
                schedule,
            } => {
                next.advance(&stage, body);
                let schedule_label = match schedule {
                    Schedule::Now => json!("now"),
                    Schedule::After(delay) => {
                        next.defer_until(after(delay));
                        json!({"after_ms": delay.as_millis() as u64})
                    }
                    Schedule::External => {
                        next.park();
                        json!("external")
                    }
                };
                (
                    EventAction::StageAdvance,
                    json!({"from": record.stage, "to": stage, "schedule": schedule_label}),
                )
            }
            Outcome::Complete(result) => {
                next.complete(result);
                (EventAction::TaskComplete, json!({"stage": record.stage}))
            }
            Outcome::Fail(reason) => {
                let details = json!({"stage": record.stage, "reason": reason});
                next.fail(reason);
                (EventAction::TaskFail, details)
            }
            Outcome::Retry(delay) => {
                let delay = delay.unwrap_or_else(|| self.config.default_retry_delay());
                next.schedule_retry((!delay.is_zero()).then(|| after(delay)));
                (
                    EventAction::StageRetry,
                    json!({"stage": record.stage, "delay_ms": delay.as_millis() as u64}),
                )
            }
        };

        let stored = self.store.compare_and_swap(&next, record.version)?;
        self.emit(&stored, action, details);
        info!(
            task_id = %stored.id,
            task_type = %stored.task_type,
            stage = %stored.stage,
            status = %stored.status,
            action = %action,
            "task transition"
        );
        Ok(stored)
    }

    /// Deliver a terminal child's outcome to its parent, exactly once.
    ///
    /// The parent transition (hook stage, child payload, child id added to
    /// `seen_children`) is a single compare-and-swap; the child's
    /// `parent_notified` flag is set afterwards. A redelivery after a crash
    /// between the two finds the child in `seen_children` and only sets the
    /// flag.
    ///
    /// Delivery waits while the parent is still working on a stage: only a
    /// parent parked on an external event receives it. Returns the parent id
    /// when the parent was transitioned and needs dispatching.
    pub(super) fn notify_parent(&self, child: &TaskRecord) -> Result<Option<TaskId>> {
        let Some(parent_id) = child.parent_task_id.as_deref() else {
            return Ok(None);
        };
        if !child.needs_parent_notification() {
            return Ok(None);
        }

        let hook = match child.status {
            TaskStatus::Failed => STAGE_ON_CHILD_FAILED,
            _ => STAGE_ON_CHILD_COMPLETE,
        };

        let mut delivered = None;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let Some(parent) = self.store.get(parent_id)? else {
                warn!(task_id = %child.id, parent_task_id = parent_id, "parent task missing, dropping child event");
                break;
            };

            if parent.seen_children.contains(&child.id) {
                debug!(task_id = %child.id, parent_task_id = parent_id, "child event already delivered");
                break;
            }
            if parent.is_terminal() {
                warn!(
                    task_id = %child.id,
                    parent_task_id = parent_id,
                    parent_status = %parent.status,
                    "parent already terminal, dropping child event"
                );
                break;
            }
            if !self.registry.has_stage(&parent.task_type, hook) {
                warn!(
                    task_id = %child.id,
                    parent_task_id = parent_id,
                    hook,
                    "parent has no hook for child event, dropping it"
                );
                break;
            }
            if !parent.waiting {
                debug!(task_id = %child.id, parent_task_id = parent_id, "parent busy, deferring child event");
                return Ok(None);
            }

            let mut next = parent.clone();
            next.deliver_child(&child.id, hook, child.body.clone());
            match self.store.compare_and_swap(&next, parent.version) {
                Ok(stored) => {
                    self.emit(
                        &stored,
                        EventAction::ChildNotify,
                        json!({"child": child.id, "child_status": child.status, "hook": hook}),
                    );
                    info!(task_id = %child.id, parent_task_id = parent_id, hook, "child event delivered");
                    delivered = Some(stored.id);
                    break;
                }
                Err(EngineError::VersionConflict { .. }) if attempts < NOTIFY_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }

        self.mark_parent_notified(&child.id)?;
        Ok(delivered)
    }

    fn mark_parent_notified(&self, child_id: &str) -> Result<()> {
        for _ in 0..NOTIFY_ATTEMPTS {
            let child = self.get(child_id)?;
            if child.parent_notified {
                return Ok(());
            }
            let mut next = child.clone();
            next.parent_notified = true;
            match self.store.compare_and_swap(&next, child.version) {
                Ok(_) => return Ok(()),
                Err(EngineError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::StoreError(format!(
            "could not mark task {} as notified: record keeps changing",
            child_id
        )))
    }
}

fn settled(record: &TaskRecord, steps: u32) -> DispatchReport {
    DispatchReport::Settled {
        task_id: record.id.clone(),
        status: record.status,
        stage: record.stage.clone(),
        steps,
    }
}

/// Wall-clock time `delay` from now. Out-of-range delays are capped at a
/// century.
fn after(delay: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or_else(|| now + chrono::Duration::days(36_500))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
