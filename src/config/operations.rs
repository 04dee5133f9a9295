//! Config loading, validation, and utility operations.

use super::model::EngineConfig;
use super::types::MIN_RECORD_GUARD_TIMEOUT_MS;
use crate::error::{EngineError, Result};
use std::path::Path;
use std::time::Duration;

impl EngineConfig {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::StoreError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Load config if the file exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::StoreError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            EngineError::StoreError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `lock_poll_interval_ms`, `lock_stale_minutes`, `resume_interval_ms`
    ///   must be positive
    /// - `max_workers` and `max_transitions` must be positive
    /// - `record_guard_timeout_ms` must be at least
    ///   `MIN_RECORD_GUARD_TIMEOUT_MS`
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("lock_poll_interval_ms", self.lock_poll_interval_ms),
            ("lock_stale_minutes", u64::from(self.lock_stale_minutes)),
            ("resume_interval_ms", self.resume_interval_ms),
            ("max_workers", self.max_workers as u64),
            ("max_transitions", u64::from(self.max_transitions)),
        ];

        for (name, value) in positive {
            if value == 0 {
                return Err(EngineError::StoreError(format!(
                    "config validation failed: {} must be greater than 0",
                    name
                )));
            }
        }

        if self.record_guard_timeout_ms < MIN_RECORD_GUARD_TIMEOUT_MS {
            return Err(EngineError::StoreError(format!(
                "config validation failed: record_guard_timeout_ms must be at least {} (got {})",
                MIN_RECORD_GUARD_TIMEOUT_MS, self.record_guard_timeout_ms
            )));
        }

        Ok(())
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn default_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.default_lock_timeout_ms)
    }

    pub fn record_guard_timeout(&self) -> Duration {
        Duration::from_millis(self.record_guard_timeout_ms)
    }

    pub fn resume_interval(&self) -> Duration {
        Duration::from_millis(self.resume_interval_ms)
    }

    pub fn default_retry_delay(&self) -> Duration {
        Duration::from_millis(self.default_retry_delay_ms)
    }
}
