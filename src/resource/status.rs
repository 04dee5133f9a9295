//! Resource status recording.
//!
//! Task handlers report the observed state of the object they act upon
//! (e.g. `available`, or `unknown` with the backend error attached). The
//! persistent resource tables belong to the surrounding platform; this crate
//! only defines the sink contract plus an in-memory implementation.

use super::ResourceRef;
use crate::error::{EngineError, Result};
use crate::events::{AuditSink, Event, EventAction};
use crate::identity::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Well-known status values.
pub struct ResourceStatus;

impl ResourceStatus {
    pub const AVAILABLE: &'static str = "available";
    pub const UNKNOWN: &'static str = "unknown";
}

/// A recorded status with its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: String,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
}

/// Destination for resource status updates.
pub trait StatusSink: Send + Sync {
    /// Set the status of `target`; `reason` is empty on success states.
    fn set_status(
        &self,
        actor: &Identity,
        target: &ResourceRef,
        status: &str,
        reason: &str,
    ) -> Result<()>;

    /// Current status of `target`, if one was ever recorded.
    fn status(&self, target: &ResourceRef) -> Result<Option<StatusChange>>;
}

/// In-memory status sink that audits every change.
pub struct MemoryStatusSink {
    statuses: Mutex<HashMap<ResourceRef, StatusChange>>,
    audit: Arc<dyn AuditSink>,
}

impl MemoryStatusSink {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            audit,
        }
    }
}

impl StatusSink for MemoryStatusSink {
    fn set_status(
        &self,
        actor: &Identity,
        target: &ResourceRef,
        status: &str,
        reason: &str,
    ) -> Result<()> {
        let previous = {
            let mut statuses = self
                .statuses
                .lock()
                .map_err(|_| EngineError::StoreError("status table poisoned".to_string()))?;
            statuses.insert(
                target.clone(),
                StatusChange {
                    status: status.to_string(),
                    reason: reason.to_string(),
                    updated_at: Utc::now(),
                },
            )
        };

        let event = Event::new(EventAction::SetStatus)
            .with_actor(&actor.name)
            .with_target(target)
            .with_details(json!({
                "from": previous.map(|p| p.status),
                "to": status,
                "reason": reason,
            }));
        self.audit.record(&event)
    }

    fn status(&self, target: &ResourceRef) -> Result<Option<StatusChange>> {
        let statuses = self
            .statuses
            .lock()
            .map_err(|_| EngineError::StoreError("status table poisoned".to_string()))?;
        Ok(statuses.get(target).cloned())
    }
}
