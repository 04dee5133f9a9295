//! Task registry: task-type name to stage handler set.
//!
//! The registry is built once at startup and moved into the engine, which
//! only reads it. Dispatch resolves `(task_type, stage)` by name on every
//! run, so a record persisted by a previous process resumes at exactly the
//! stage it names.

use crate::error::{EngineError, Result};
use crate::runtime::{Outcome, TaskContext};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Stage invoked when a task is created.
pub const STAGE_INIT: &str = "Init";

/// Stage a parent runs when a child task completes.
pub const STAGE_ON_CHILD_COMPLETE: &str = "OnChildComplete";

/// Stage a parent runs when a child task fails.
pub const STAGE_ON_CHILD_FAILED: &str = "OnChildFailed";

/// One named step of a task type.
///
/// Handlers must tolerate being re-invoked with the same body: a crash after
/// the handler's side effects but before the transition is persisted makes
/// the engine run the stage again.
pub trait StageHandler: Send + Sync {
    fn run(&self, ctx: &TaskContext, body: Value) -> Result<Outcome>;
}

impl<F> StageHandler for F
where
    F: Fn(&TaskContext, Value) -> Result<Outcome> + Send + Sync,
{
    fn run(&self, ctx: &TaskContext, body: Value) -> Result<Outcome> {
        self(ctx, body)
    }
}

/// The stages of one task type.
#[derive(Default, Clone)]
pub struct StageHandlerSet {
    stages: HashMap<String, Arc<dyn StageHandler>>,
    duplicates: Vec<String>,
}

impl StageHandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage implemented by a closure or function.
    pub fn stage<F>(self, name: &str, handler: F) -> Self
    where
        F: Fn(&TaskContext, Value) -> Result<Outcome> + Send + Sync + 'static,
    {
        self.stage_handler(name, handler)
    }

    /// Add a stage implemented by a [`StageHandler`] value.
    pub fn stage_handler<H: StageHandler + 'static>(mut self, name: &str, handler: H) -> Self {
        if self
            .stages
            .insert(name.to_string(), Arc::new(handler))
            .is_some()
        {
            self.duplicates.push(name.to_string());
        }
        self
    }

    pub fn on_child_complete<F>(self, handler: F) -> Self
    where
        F: Fn(&TaskContext, Value) -> Result<Outcome> + Send + Sync + 'static,
    {
        self.stage(STAGE_ON_CHILD_COMPLETE, handler)
    }

    pub fn on_child_failed<F>(self, handler: F) -> Self
    where
        F: Fn(&TaskContext, Value) -> Result<Outcome> + Send + Sync + 'static,
    {
        self.stage(STAGE_ON_CHILD_FAILED, handler)
    }

    pub fn has_stage(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Stage names, sorted.
    pub fn stage_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn StageHandler>> {
        self.stages.get(name).cloned()
    }
}

impl std::fmt::Debug for StageHandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageHandlerSet")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Registered task types.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    types: HashMap<String, StageHandlerSet>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task type.
    ///
    /// An empty name, a set without an `Init` stage, a stage registered
    /// twice, or a type name already in use are configuration errors.
    pub fn register(&mut self, task_type: &str, set: StageHandlerSet) -> Result<()> {
        if task_type.trim().is_empty() {
            return Err(EngineError::RegistrationConflict(
                "task type name must not be empty".to_string(),
            ));
        }
        if let Some(stage) = set.duplicates.first() {
            return Err(EngineError::RegistrationConflict(format!(
                "stage '{}' registered twice for task type '{}'",
                stage, task_type
            )));
        }
        if !set.has_stage(STAGE_INIT) {
            return Err(EngineError::RegistrationConflict(format!(
                "task type '{}' has no '{}' stage",
                task_type, STAGE_INIT
            )));
        }
        if self.types.contains_key(task_type) {
            return Err(EngineError::RegistrationConflict(format!(
                "task type '{}' is already registered",
                task_type
            )));
        }

        self.types.insert(task_type.to_string(), set);
        Ok(())
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.types.contains_key(task_type)
    }

    /// Resolve the handler for `(task_type, stage)`.
    pub fn handler(&self, task_type: &str, stage: &str) -> Option<Arc<dyn StageHandler>> {
        self.types.get(task_type)?.handler(stage)
    }

    pub fn has_stage(&self, task_type: &str, stage: &str) -> bool {
        self.types
            .get(task_type)
            .is_some_and(|set| set.has_stage(stage))
    }

    /// Registered task type names, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
