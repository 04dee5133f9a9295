//! Audit event log.
//!
//! Every task transition, metadata change, status change and operator lock
//! clear produces one [`Event`]. Events go to an [`AuditSink`]; the file sink
//! appends them in NDJSON format (one JSON object per line) to
//! `events/events.ndjson` in the state directory.
//!
//! # Event Format
//!
//! Each event is a JSON object with the following fields:
//! - `ts`: RFC3339 timestamp
//! - `action`: The action performed (task_create, stage_advance, ...)
//! - `actor`: Identity name, or `user@HOST` for operator actions
//! - `task`: Optional task ID for task-specific events
//! - `target`: Optional resource key the action concerns
//! - `details`: Freeform object with action-specific details
//!
//! ```no_run
//! use taskman::context::StateContext;
//! use taskman::events::{AuditSink, Event, EventAction, FileAuditSink};
//! use serde_json::json;
//!
//! let ctx = StateContext::resolve(None)?;
//! let sink = FileAuditSink::new(&ctx);
//! let event = Event::new(EventAction::LockClear)
//!     .with_details(json!({"key": "server::1"}));
//! sink.record(&event)?;
//! # Ok::<(), taskman::error::EngineError>(())
//! ```

use crate::context::StateContext;
use crate::error::{EngineError, Result};
use crate::locks::get_owner_string;
use crate::resource::Keyable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Actions that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Task record created
    TaskCreate,
    /// Task moved to another stage (or started its first stage)
    StageAdvance,
    /// Stage scheduled for another attempt
    StageRetry,
    /// Task completed
    TaskComplete,
    /// Task failed
    TaskFail,
    /// Child terminal state delivered to the parent
    ChildNotify,
    /// Metadata key set
    SetMetadata,
    /// Metadata key removed
    DelMetadata,
    /// Resource status changed
    SetStatus,
    /// Lock cleared manually
    LockClear,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::TaskCreate => write!(f, "task_create"),
            EventAction::StageAdvance => write!(f, "stage_advance"),
            EventAction::StageRetry => write!(f, "stage_retry"),
            EventAction::TaskComplete => write!(f, "task_complete"),
            EventAction::TaskFail => write!(f, "task_fail"),
            EventAction::ChildNotify => write!(f, "child_notify"),
            EventAction::SetMetadata => write!(f, "set_metadata"),
            EventAction::DelMetadata => write!(f, "del_metadata"),
            EventAction::SetStatus => write!(f, "set_status"),
            EventAction::LockClear => write!(f, "lock_clear"),
        }
    }
}

/// An event record for the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// RFC3339 timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    /// The action that was performed.
    pub action: EventAction,

    /// Who performed the action.
    pub actor: String,

    /// Optional task ID for task-specific events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// Optional resource key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Freeform details object with action-specific information.
    pub details: Value,
}

impl Event {
    /// Create a new event with the given action.
    ///
    /// The actor defaults to the process owner (`USER@HOSTNAME`).
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: get_owner_string(),
            task: None,
            target: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task = Some(task_id.into());
        self
    }

    pub fn with_target<K: Keyable + ?Sized>(mut self, target: &K) -> Self {
        self.target = Some(target.resource_key());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            EngineError::StoreError(format!("failed to serialize event to JSON: {}", e))
        })
    }
}

/// Destination for audit events.
///
/// A failed `record` is reported to the caller; state changes that were
/// already persisted are not rolled back.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &Event) -> Result<()>;
}

/// Appends events to an NDJSON file.
#[derive(Debug)]
pub struct FileAuditSink {
    path: PathBuf,
    // Serializes appends from threads of this process.
    write_lock: Mutex<()>,
}

impl FileAuditSink {
    /// Sink writing to the state directory's `events/events.ndjson`.
    pub fn new(ctx: &StateContext) -> Self {
        Self::at(ctx.events_file())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    /// Append the event as a single line with a trailing newline, creating
    /// the file if it doesn't exist, then sync it to disk.
    fn record(&self, event: &Event) -> Result<()> {
        let json_line = event.to_ndjson_line()?;
        let _serialized = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(dir) = self.path.parent()
            && !dir.exists()
        {
            fs::create_dir_all(dir).map_err(|e| {
                EngineError::StoreError(format!(
                    "failed to create events directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                EngineError::StoreError(format!(
                    "failed to open events file '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;

        // One write per line so concurrent appenders never interleave.
        file.write_all(format!("{}\n", json_line).as_bytes())
            .map_err(|e| {
                EngineError::StoreError(format!(
                    "failed to write event to '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;

        file.sync_all().map_err(|e| {
            EngineError::StoreError(format!(
                "failed to sync events file '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Keeps events in memory. Used by tests and embedders without a state
/// directory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<Event>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded event, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Recorded events with the given action.
    pub fn events_with(&self, action: EventAction) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &Event) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Read every event from an NDJSON log. A missing file is an empty log;
/// malformed lines are skipped with a warning.
pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<Event>> {
    let path = path.as_ref();
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(EngineError::StoreError(format!(
                "failed to open events file '{}': {}",
                path.display(),
                e
            )));
        }
    };

    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| {
            EngineError::StoreError(format!(
                "failed to read events file '{}': {}",
                path.display(),
                e
            ))
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(line = index + 1, error = %e, "skipping malformed event"),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceRef;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_state() -> (TempDir, StateContext) {
        let temp_dir = TempDir::new().unwrap();
        let ctx = StateContext::resolve_from(temp_dir.path()).unwrap();
        (temp_dir, ctx)
    }

    #[test]
    fn test_event_creation() {
        let event = Event::new(EventAction::TaskCreate);

        assert_eq!(event.action, EventAction::TaskCreate);
        assert!(!event.actor.is_empty());
        assert!(event.task.is_none());
        assert!(event.target.is_none());
        let age = Utc::now().signed_duration_since(event.ts);
        assert!(age.num_minutes() < 1);
    }

    #[test]
    fn test_event_builders() {
        let event = Event::new(EventAction::SetMetadata)
            .with_actor("alice")
            .with_task("t-1")
            .with_target(&ResourceRef::new("server", "s1"))
            .with_details(json!({"key": "color"}));

        assert_eq!(event.actor, "alice");
        assert_eq!(event.task.as_deref(), Some("t-1"));
        assert_eq!(event.target.as_deref(), Some("server::s1"));
        assert_eq!(event.details["key"], "color");
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new(EventAction::StageAdvance)
            .with_task("t-1")
            .with_details(json!({"from": "Init", "to": "Poll"}));

        let json_line = event.to_ndjson_line().unwrap();
        assert!(!json_line.contains('\n'));
        assert!(json_line.contains("\"action\":\"stage_advance\""));
        assert!(!json_line.contains("\"target\""));

        let parsed: Event = serde_json::from_str(&json_line).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_action_display_matches_serde() {
        for action in [
            EventAction::TaskCreate,
            EventAction::StageRetry,
            EventAction::ChildNotify,
            EventAction::DelMetadata,
            EventAction::LockClear,
        ] {
            let serialized = serde_json::to_value(action).unwrap();
            assert_eq!(serialized, json!(action.to_string()));
        }
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let (_temp_dir, ctx) = create_test_state();
        let sink = FileAuditSink::new(&ctx);

        sink.record(&Event::new(EventAction::TaskCreate).with_task("a"))
            .unwrap();
        sink.record(&Event::new(EventAction::TaskComplete).with_task("a"))
            .unwrap();

        let content = fs::read_to_string(ctx.events_file()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with('\n'));

        let events = read_events(ctx.events_file()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, EventAction::TaskCreate);
        assert_eq!(events[1].action, EventAction::TaskComplete);
    }

    #[test]
    fn test_file_sink_concurrent_appends() {
        let (_temp_dir, ctx) = create_test_state();
        let sink = std::sync::Arc::new(FileAuditSink::new(&ctx));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sink = std::sync::Arc::clone(&sink);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        let event = Event::new(EventAction::StageAdvance)
                            .with_task(format!("t-{}-{}", i, j));
                        sink.record(&event).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(read_events(ctx.events_file()).unwrap().len(), 100);
    }

    #[test]
    fn test_read_events_missing_file() {
        let (_temp_dir, ctx) = create_test_state();
        assert!(read_events(ctx.events_file()).unwrap().is_empty());
    }

    #[test]
    fn test_read_events_skips_malformed_lines() {
        let (_temp_dir, ctx) = create_test_state();
        let sink = FileAuditSink::new(&ctx);
        sink.record(&Event::new(EventAction::TaskCreate)).unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(ctx.events_file())
            .unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();
        drop(file);
        sink.record(&Event::new(EventAction::TaskFail)).unwrap();

        let events = read_events(ctx.events_file()).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryAuditSink::new();
        sink.record(&Event::new(EventAction::SetStatus)).unwrap();
        sink.record(&Event::new(EventAction::LockClear)).unwrap();

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.events_with(EventAction::LockClear).len(), 1);
    }
}
