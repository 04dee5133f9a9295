//! Error types for the task engine and lock manager.
//!
//! Uses thiserror for derive macros. Every variant maps to a CLI exit code so
//! operator tooling and synchronous callers report failures consistently.

use crate::exit_codes;
use crate::task::TaskStatus;
use serde_json::Value;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No handler set is registered under this task type.
    #[error("unknown task type '{0}'")]
    UnknownTaskType(String),

    /// Invalid or duplicate registration; fatal at startup.
    #[error("registration conflict: {0}")]
    RegistrationConflict(String),

    /// Structurally invalid task (unknown stage, transition limit, handler panic).
    #[error("internal error: {0}")]
    InternalError(String),

    /// Handler-detected bad input.
    #[error("Validation failed: {0}")]
    ValidationError(String),

    /// Transient failure calling an external backend.
    #[error("external API error: {0}")]
    ExternalApiError(String),

    /// Lock could not be acquired before the deadline or cancellation.
    #[error("Lock acquisition failed: {0}")]
    LockTimeout(String),

    /// Capability check failed.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A transition was requested on a task that already reached a terminal state.
    #[error("task {task_id} is already {status}")]
    TaskTerminal { task_id: String, status: TaskStatus },

    /// Optimistic concurrency check failed.
    #[error("version conflict on task {task_id}: expected {expected}, found {actual}")]
    VersionConflict {
        task_id: String,
        expected: u64,
        actual: u64,
    },

    /// Task record does not exist.
    #[error("task '{0}' not found")]
    NotFound(String),

    /// Terminal failure reason surfaced to synchronous callers.
    #[error("task failed: {0}")]
    TaskFailed(Value),

    /// A synchronous wait ran past its deadline or was cancelled.
    #[error("timed out: {0}")]
    Timeout(String),

    /// I/O or serialization failure in a store, sink, config or lock file.
    #[error("{0}")]
    StoreError(String),
}

impl EngineError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::UnknownTaskType(_)
            | EngineError::RegistrationConflict(_)
            | EngineError::NotFound(_)
            | EngineError::VersionConflict { .. }
            | EngineError::TaskTerminal { .. }
            | EngineError::StoreError(_) => exit_codes::USER_ERROR,
            EngineError::ValidationError(_) | EngineError::Forbidden(_) => {
                exit_codes::VALIDATION_FAILURE
            }
            EngineError::InternalError(_)
            | EngineError::ExternalApiError(_)
            | EngineError::TaskFailed(_) => exit_codes::TASK_FAILURE,
            EngineError::LockTimeout(_) | EngineError::Timeout(_) => exit_codes::LOCK_FAILURE,
        }
    }

    /// JSON reason stored in a failed task's body.
    pub fn to_reason(&self) -> Value {
        match self {
            EngineError::TaskFailed(reason) => reason.clone(),
            other => Value::String(other.to_string()),
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
