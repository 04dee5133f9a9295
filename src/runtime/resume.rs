//! Crash recovery: the resume scan and its periodic loop.

use super::{DispatchReport, TaskEngine};
use crate::call::CallContext;
use crate::error::Result;
use crate::task::TaskId;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;
use tracing::{debug, error, info};

/// Summary of one resume scan.
#[derive(Debug, Default, Clone)]
pub struct ResumeReport {
    /// Records examined.
    pub scanned: usize,
    /// Child outcomes delivered to parents.
    pub notified: usize,
    /// One entry per dispatched task.
    pub dispatched: Vec<DispatchReport>,
    /// Dispatches or notifications that returned an error.
    pub errors: usize,
}

impl ResumeReport {
    pub fn is_idle(&self) -> bool {
        self.notified == 0 && self.dispatched.is_empty() && self.errors == 0
    }
}

impl TaskEngine {
    /// Redispatch every unfinished task that is due, and deliver child
    /// outcomes that never reached their parent.
    ///
    /// Tasks in flight in this process, parked on an external event, or
    /// delayed into the future are left alone. Due tasks are dispatched on
    /// up to `max_workers` threads.
    pub fn resume_pending(&self) -> Result<ResumeReport> {
        let records = self.store.list()?;
        let now = Utc::now();
        let mut report = ResumeReport {
            scanned: records.len(),
            ..ResumeReport::default()
        };

        let mut due: VecDeque<TaskId> = VecDeque::new();
        for record in &records {
            if record.needs_parent_notification() {
                match self.notify_parent(record) {
                    Ok(Some(parent_id)) => {
                        report.notified += 1;
                        due.push_back(parent_id);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(task_id = %record.id, error = %e, "failed to deliver child event");
                        report.errors += 1;
                    }
                }
            }
        }

        for record in &records {
            if record.is_resumable(now) && !self.is_in_flight(&record.id) && !due.contains(&record.id) {
                due.push_back(record.id.clone());
            }
        }

        if due.is_empty() {
            return Ok(report);
        }

        let workers = self.config.max_workers.min(due.len()).max(1);
        debug!(due = due.len(), workers, "resuming tasks");

        let queue = Mutex::new(due);
        let results = Mutex::new(Vec::new());
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                        let Some(task_id) = next else { break };
                        let result = self.dispatch(&task_id);
                        if let Err(e) = &result {
                            error!(task_id = %task_id, error = %e, "resume dispatch failed");
                        }
                        results.lock().unwrap_or_else(|e| e.into_inner()).push(result);
                    }
                });
            }
        });

        for result in results.into_inner().unwrap_or_else(|e| e.into_inner()) {
            match result {
                Ok(dispatch) => report.dispatched.push(dispatch),
                Err(_) => report.errors += 1,
            }
        }

        info!(
            scanned = report.scanned,
            notified = report.notified,
            dispatched = report.dispatched.len(),
            errors = report.errors,
            "resume scan finished"
        );
        Ok(report)
    }

    /// Run [`resume_pending`](Self::resume_pending) every `resume_interval`
    /// until the context is cancelled or expires.
    pub fn run_resume_loop(&self, ctx: &CallContext) {
        let interval = self.config.resume_interval();
        info!(interval_ms = interval.as_millis() as u64, "resume loop started");
        while !ctx.is_done() {
            if let Err(e) = self.resume_pending() {
                error!(error = %e, "resume scan failed");
            }
            if !ctx.sleep(interval) {
                break;
            }
        }
        info!(reason = ctx.done_reason(), "resume loop stopped");
    }
}
