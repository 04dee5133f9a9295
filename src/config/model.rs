//! EngineConfig struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Configuration for the task engine and lock manager.
///
/// This struct represents the contents of `config.yaml` in the state directory.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // =========================================================================
    // Lock settings
    // =========================================================================
    /// How often a blocked acquirer re-checks a lock file held by another process.
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,

    /// Minutes after which a held lock is reported as stale.
    #[serde(default = "default_lock_stale_minutes")]
    pub lock_stale_minutes: u32,

    /// Deadline used by callers that do not bring their own.
    #[serde(default = "default_lock_timeout_ms")]
    pub default_lock_timeout_ms: u64,

    /// Upper bound on waiting for a record's compare-and-swap guard. A guard
    /// is only treated as abandoned once it is several times older than this.
    #[serde(default = "default_record_guard_timeout_ms")]
    pub record_guard_timeout_ms: u64,

    // =========================================================================
    // Runtime settings
    // =========================================================================
    /// Interval of the resume loop and of synchronous polling.
    #[serde(default = "default_resume_interval_ms")]
    pub resume_interval_ms: u64,

    /// Maximum worker threads used by a single resume scan.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Transitions after which a task is failed as a runaway stage cycle.
    #[serde(default = "default_max_transitions")]
    pub max_transitions: u32,

    /// Delay of a retry whose handler gave none (`Outcome::Retry(None)`).
    #[serde(default = "default_retry_delay_ms")]
    pub default_retry_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            lock_stale_minutes: default_lock_stale_minutes(),
            default_lock_timeout_ms: default_lock_timeout_ms(),
            record_guard_timeout_ms: default_record_guard_timeout_ms(),
            resume_interval_ms: default_resume_interval_ms(),
            max_workers: default_max_workers(),
            max_transitions: default_max_transitions(),
            default_retry_delay_ms: default_retry_delay_ms(),
        }
    }
}
