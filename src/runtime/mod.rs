//! Task runtime.
//!
//! [`TaskEngine`] creates tasks, dispatches their stages, persists every
//! transition through the record store's compare-and-swap, delivers child
//! outcomes to parents, and resumes unfinished tasks after a restart.
//!
//! # Lifecycle
//!
//! ```text
//! init --first dispatch--> running(Init) --Advance--> running(S2) ... --> complete | failed
//!                             ^    |
//!                             +----+ Retry
//! ```
//!
//! Terminal states are immutable. No in-memory execution state survives a
//! dispatch: the persisted `(stage, body)` pair is the whole continuation.

mod context;
mod dispatch;
mod invoke;
mod outcome;
mod resume;


pub use context::TaskContext;
pub use outcome::{Outcome, Schedule};
pub use resume::ResumeReport;

use crate::config::EngineConfig;
use crate::context::StateContext;
use crate::error::{EngineError, Result};
use crate::events::{AuditSink, Event, EventAction, FileAuditSink};
use crate::identity::Identity;
use crate::locks::LockManager;
use crate::registry::TaskRegistry;
use crate::resource::ResourceRef;
use crate::task::{FileRecordStore, RecordStore, TaskId, TaskRecord, TaskStatus};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use tracing::{debug, error, info, warn};

/// Retries of a background dispatch that found its task in flight.
const BACKGROUND_DISPATCH_ATTEMPTS: usize = 100;

/// Request to create a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: String,
    pub target: ResourceRef,
    /// Body of the `Init` stage.
    pub params: Value,
    pub actor: Identity,
    pub parent_task_id: Option<TaskId>,
}

impl NewTask {
    pub fn new(task_type: &str, target: ResourceRef, params: Value, actor: Identity) -> Self {
        Self {
            task_type: task_type.to_string(),
            target,
            params,
            actor,
            parent_task_id: None,
        }
    }

    pub fn with_parent(mut self, parent_task_id: impl Into<TaskId>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }
}

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchReport {
    /// Handlers ran (`steps` of them) and the record rests in `status` at
    /// `stage`.
    Settled {
        task_id: TaskId,
        status: TaskStatus,
        stage: String,
        steps: u32,
    },
    /// Another dispatch of this task is in flight in this process.
    Skipped { task_id: TaskId },
    /// A concurrent writer changed the record first; the outcome of the last
    /// handler run was discarded.
    Conflict { task_id: TaskId, steps: u32 },
}

impl DispatchReport {
    pub fn task_id(&self) -> &str {
        match self {
            DispatchReport::Settled { task_id, .. }
            | DispatchReport::Skipped { task_id }
            | DispatchReport::Conflict { task_id, .. } => task_id,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DispatchReport::Skipped { .. })
    }
}

/// Resumable multi-stage task engine.
pub struct TaskEngine {
    registry: TaskRegistry,
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
    locks: LockManager,
    config: EngineConfig,
    /// Task ids with a dispatch running in this process.
    in_flight: Mutex<HashSet<TaskId>>,
    this: Weak<TaskEngine>,
}

/// Marks a task in flight until dropped.
struct InFlight<'a> {
    engine: &'a TaskEngine,
    task_id: TaskId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.engine.in_flight().remove(&self.task_id);
    }
}

impl TaskEngine {
    /// Engine with a process-local lock manager.
    pub fn new(
        registry: TaskRegistry,
        store: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Self::with_locks(registry, store, audit, LockManager::in_memory(), config)
    }

    pub fn with_locks(
        registry: TaskRegistry,
        store: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditSink>,
        locks: LockManager,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry,
            store,
            audit,
            locks,
            config,
            in_flight: Mutex::new(HashSet::new()),
            this: this.clone(),
        })
    }

    /// Engine backed entirely by the state directory: file record store,
    /// NDJSON audit log and file locks shared with every other process
    /// using the same directory.
    pub fn open(layout: &StateContext, registry: TaskRegistry, config: EngineConfig) -> Result<Arc<Self>> {
        let store = FileRecordStore::open(layout, &config)?;
        let locks = LockManager::open(layout, &config);
        Ok(Self::with_locks(
            registry,
            Arc::new(store),
            Arc::new(FileAuditSink::new(layout)),
            locks,
            config,
        ))
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a task and dispatch its `Init` stage on a background thread.
    ///
    /// Returns as soon as the record is persisted.
    pub fn new_task(&self, request: NewTask) -> Result<TaskId> {
        let record = self.create(request)?;
        self.spawn_dispatch(record.id.clone());
        Ok(record.id)
    }

    /// Load a task record.
    pub fn get(&self, task_id: &str) -> Result<TaskRecord> {
        self.store
            .get(task_id)?
            .ok_or_else(|| EngineError::NotFound(task_id.to_string()))
    }

    /// Task records, optionally restricted to one status.
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>> {
        match status {
            Some(status) => self.store.list_by_status(&[status]),
            None => self.store.list(),
        }
    }

    /// Apply an outcome from outside a handler (an external event).
    ///
    /// A resulting runnable stage is dispatched on a background thread; a
    /// resulting terminal state is delivered to the parent.
    pub fn apply(&self, task_id: &str, outcome: Outcome) -> Result<TaskRecord> {
        let record = self.get(task_id)?;
        if record.is_terminal() {
            return Err(EngineError::TaskTerminal {
                task_id: record.id,
                status: record.status,
            });
        }

        let stored = self.commit(&record, outcome)?;
        if stored.is_terminal() {
            if let Some(parent_id) = self.notify_parent(&stored)? {
                self.spawn_dispatch(parent_id);
            }
        } else if stored.is_resumable(chrono::Utc::now()) {
            self.spawn_dispatch(stored.id.clone());
        }
        Ok(stored)
    }

    fn create(&self, request: NewTask) -> Result<TaskRecord> {
        if !self.registry.contains(&request.task_type) {
            return Err(EngineError::UnknownTaskType(request.task_type));
        }
        request.target.validate()?;
        if let Some(parent_id) = &request.parent_task_id {
            self.get(parent_id)?;
        }

        let record = TaskRecord::new(
            request.task_type,
            request.target,
            request.params,
            request.actor,
            request.parent_task_id,
        );
        self.store.create(&record)?;

        self.emit(
            &record,
            EventAction::TaskCreate,
            json!({
                "task_type": record.task_type,
                "parent_task_id": record.parent_task_id,
            }),
        );
        info!(
            task_id = %record.id,
            task_type = %record.task_type,
            target = %record.target,
            "task created"
        );
        Ok(record)
    }

    fn spawn_dispatch(&self, task_id: TaskId) {
        let Some(engine) = self.this.upgrade() else {
            return;
        };
        let spawned = thread::Builder::new()
            .name("taskman-dispatch".to_string())
            .spawn(move || {
                // A dispatch finishing up in this process can still hold the
                // task briefly; retry before leaving it to the resume scan.
                for _ in 0..BACKGROUND_DISPATCH_ATTEMPTS {
                    if !engine.has_work(&task_id) {
                        return;
                    }
                    match engine.dispatch(&task_id) {
                        Ok(report) if report.is_skipped() => {
                            thread::sleep(engine.config.lock_poll_interval());
                        }
                        Ok(_) => return,
                        Err(e) => {
                            error!(task_id = %task_id, error = %e, "background dispatch failed");
                            return;
                        }
                    }
                }
                debug!(task_id = %task_id, "task still in flight, leaving it to the resume scan");
            });
        if let Err(e) = spawned {
            // The resume scan picks the task up later.
            warn!(error = %e, "failed to spawn dispatch thread");
        }
    }

    /// Whether a background dispatch of `task_id` has anything to do.
    fn has_work(&self, task_id: &str) -> bool {
        match self.store.get(task_id) {
            Ok(Some(record)) => {
                record.is_resumable(chrono::Utc::now()) || record.needs_parent_notification()
            }
            Ok(None) => false,
            Err(e) => {
                warn!(task_id, error = %e, "failed to load task for dispatch");
                false
            }
        }
    }

    fn arc(&self) -> Result<Arc<TaskEngine>> {
        self.this
            .upgrade()
            .ok_or_else(|| EngineError::InternalError("engine is shutting down".to_string()))
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<TaskId>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn claim(&self, task_id: &str) -> Option<InFlight<'_>> {
        if !self.in_flight().insert(task_id.to_string()) {
            return None;
        }
        Some(InFlight {
            engine: self,
            task_id: task_id.to_string(),
        })
    }

    fn is_in_flight(&self, task_id: &str) -> bool {
        self.in_flight().contains(task_id)
    }

    /// Record an audit event for `record`. State is already persisted, so a
    /// sink failure is logged rather than returned.
    fn emit(&self, record: &TaskRecord, action: EventAction, details: Value) {
        let event = Event::new(action)
            .with_actor(&record.actor.name)
            .with_task(&record.id)
            .with_target(&record.target)
            .with_details(details);
        if let Err(e) = self.audit.record(&event) {
            error!(task_id = %record.id, action = %action, error = %e, "failed to record audit event");
        }
    }
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("task_types", &self.registry.task_types())
            .field("config", &self.config)
            .finish()
    }
}
