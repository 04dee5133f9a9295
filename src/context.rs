//! State directory resolution for taskman.
//!
//! This module provides the "environment resolution" layer that locates the
//! durable state directory shared by every engine process and resolves the
//! canonical paths inside it.
//!
//! All stores, the lock manager and the audit sink take their paths from a
//! [`StateContext`], so every process pointed at the same directory shares the
//! same task records, lock files and audit log.
//!
//! # Layout
//!
//! ```text
//! <state_dir>/
//!   config.yaml
//!   tasks/<task-id>.json
//!   locks/<encoded key>.lock
//!   metadata/<encoded key>.json
//!   events/events.ndjson
//! ```

use crate::error::{EngineError, Result};
use crate::resource::encode_key_for_path;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "TASKMAN_HOME";

/// Default state directory relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".taskman";

/// Resolved paths for the taskman state directory.
///
/// All paths are absolute.
#[derive(Debug, Clone)]
pub struct StateContext {
    /// Absolute path to the state directory.
    pub state_dir: PathBuf,

    /// Absolute path to the task records directory (`{state_dir}/tasks/`).
    pub tasks_dir: PathBuf,

    /// Absolute path to the locks directory (`{state_dir}/locks/`).
    pub locks_dir: PathBuf,

    /// Absolute path to the metadata directory (`{state_dir}/metadata/`).
    pub metadata_dir: PathBuf,
}

impl StateContext {
    /// Resolve the state context.
    ///
    /// Precedence: the explicit directory, then `TASKMAN_HOME`, then
    /// `.taskman` under the current working directory.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let dir = match explicit {
            Some(dir) => dir.to_path_buf(),
            None => match env::var_os(STATE_DIR_ENV) {
                Some(dir) if !dir.is_empty() => PathBuf::from(dir),
                _ => PathBuf::from(DEFAULT_STATE_DIR),
            },
        };

        Self::resolve_from(dir)
    }

    /// Resolve the state context rooted at a specific directory.
    ///
    /// Relative paths are anchored at the current working directory.
    pub fn resolve_from<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let state_dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            let cwd = env::current_dir().map_err(|e| {
                EngineError::StoreError(format!("failed to get current working directory: {}", e))
            })?;
            cwd.join(dir)
        };

        Ok(Self {
            tasks_dir: state_dir.join("tasks"),
            locks_dir: state_dir.join("locks"),
            metadata_dir: state_dir.join("metadata"),
            state_dir,
        })
    }

    /// Create every directory of the layout that does not exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.state_dir,
            &self.tasks_dir,
            &self.locks_dir,
            &self.metadata_dir,
            &self.events_dir(),
        ] {
            fs::create_dir_all(dir).map_err(|e| {
                EngineError::StoreError(format!(
                    "failed to create state directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Check whether the state directory exists.
    pub fn exists(&self) -> bool {
        self.state_dir.exists()
    }

    /// Ensure the state directory exists, returning an error if not.
    ///
    /// Used by read-only operator commands, which should never create state.
    pub fn ensure_initialized(&self) -> Result<()> {
        if !self.exists() {
            return Err(EngineError::StoreError(format!(
                "taskman state directory not found.\n\
                 Expected: {}\n\n\
                 Pass --state-dir or set {} to point at an engine state directory.",
                self.state_dir.display(),
                STATE_DIR_ENV
            )));
        }
        Ok(())
    }

    /// Get the path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.yaml")
    }

    /// Get the path to the events directory.
    pub fn events_dir(&self) -> PathBuf {
        self.state_dir.join("events")
    }

    /// Get the path to the main events log file.
    pub fn events_file(&self) -> PathBuf {
        self.events_dir().join("events.ndjson")
    }

    /// Get the path to a task record file.
    pub fn task_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{}.json", task_id))
    }

    /// Get the path of the compare-and-swap guard file for a task record.
    pub fn task_guard_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{}.json.guard", task_id))
    }

    /// Get the path to a resource lock file.
    pub fn lock_path(&self, key: &str) -> PathBuf {
        self.locks_dir
            .join(format!("{}.lock", encode_key_for_path(key)))
    }

    /// Get the path to an object's metadata document.
    pub fn metadata_path(&self, key: &str) -> PathBuf {
        self.metadata_dir
            .join(format!("{}.json", encode_key_for_path(key)))
    }
}
