//! Transition helpers for task records.
//!
//! Each helper rewrites the continuation in place and bumps the transition
//! counter. Persisting the result (and the version check) is the caller's
//! job.

use super::{TaskRecord, TaskStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;

impl TaskRecord {
    fn begin_transition(&mut self) {
        self.transitions = self.transitions.saturating_add(1);
        self.updated_at = Utc::now();
        self.next_run_at = None;
        self.waiting = false;
    }

    /// Move to `stage` with a replacement body.
    pub fn advance(&mut self, stage: &str, body: Value) {
        self.begin_transition();
        self.status = TaskStatus::Running;
        self.stage = stage.to_string();
        self.body = body;
    }

    /// Keep the current stage and body; redispatch no earlier than `at`.
    pub fn schedule_retry(&mut self, at: Option<DateTime<Utc>>) {
        self.begin_transition();
        self.status = TaskStatus::Running;
        self.next_run_at = at;
    }

    /// Park the current stage until an external event dispatches it.
    pub fn park(&mut self) {
        self.waiting = true;
    }

    /// Delay the current stage until `at`.
    pub fn defer_until(&mut self, at: DateTime<Utc>) {
        self.next_run_at = Some(at);
    }

    pub fn complete(&mut self, result: Value) {
        self.begin_transition();
        self.status = TaskStatus::Complete;
        self.body = result;
    }

    pub fn fail(&mut self, reason: Value) {
        self.begin_transition();
        self.status = TaskStatus::Failed;
        self.body = reason;
    }

    /// Deliver a child's terminal payload: run `hook` next with `payload`.
    pub fn deliver_child(&mut self, child_id: &str, hook: &str, payload: Value) {
        self.advance(hook, payload);
        self.seen_children.insert(child_id.to_string());
    }

    /// Claim a freshly created record for its first dispatch. Not counted
    /// as a transition.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.updated_at = Utc::now();
    }
}
