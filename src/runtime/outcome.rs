//! Stage outcomes.

use serde_json::Value;
use std::time::Duration;

/// When an advanced-to stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// In the same dispatch, right away.
    Now,
    /// Not before the delay elapses; picked up by the resume scan.
    After(Duration),
    /// Only on an external event: an explicit dispatch or a child task's
    /// terminal state.
    External,
}

/// What a stage handler decided. Exactly one per dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Move to `stage`; `body` replaces the current body.
    Advance {
        stage: String,
        body: Value,
        schedule: Schedule,
    },
    /// Terminal success with a result.
    Complete(Value),
    /// Terminal failure with a reason.
    Fail(Value),
    /// Run the same stage again with the same body after the delay. `None`
    /// uses the configured default delay; a zero delay reruns immediately.
    Retry(Option<Duration>),
}

impl Outcome {
    pub fn advance(stage: &str, body: Value) -> Self {
        Outcome::Advance {
            stage: stage.to_string(),
            body,
            schedule: Schedule::Now,
        }
    }

    pub fn advance_after(stage: &str, body: Value, delay: Duration) -> Self {
        Outcome::Advance {
            stage: stage.to_string(),
            body,
            schedule: Schedule::After(delay),
        }
    }

    /// Park at `stage` until an external event.
    pub fn wait_at(stage: &str, body: Value) -> Self {
        Outcome::Advance {
            stage: stage.to_string(),
            body,
            schedule: Schedule::External,
        }
    }

    pub fn complete(result: Value) -> Self {
        Outcome::Complete(result)
    }

    pub fn fail(reason: impl Into<Value>) -> Self {
        Outcome::Fail(reason.into())
    }

    pub fn retry_after(delay: Duration) -> Self {
        Outcome::Retry(Some(delay))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Complete(_) | Outcome::Fail(_))
    }
}
