//! Per-object metadata (tag) store.
//!
//! Arbitrary key/value tags attached to platform objects, one JSON document
//! per object under `metadata/`. Writes take the object's lock from the
//! [`LockManager`], so concurrent writers of the same object never lose each
//! other's keys. Reads go straight to the document, which is always replaced
//! atomically.
//!
//! Key classes:
//! - `_`-prefixed keys are reserved for system administrators.
//! - `ext:`-prefixed keys mirror tags of an external cloud provider.
//!
//! An empty value means "unset"; the values `none` and `null` (any case)
//! are stored as empty.

#[cfg(test)]
mod tests;

use crate::call::CallContext;
use crate::context::StateContext;
use crate::error::{EngineError, Result};
use crate::events::{AuditSink, Event, EventAction};
use crate::fs::{atomic_write_json, read_json};
use crate::identity::Identity;
use crate::locks::LockManager;
use crate::resource::{Keyable, ResourceRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix of keys only system administrators may read or write.
pub const SYSTEM_ADMIN_PREFIX: &str = "_";

/// Prefix of keys mirrored from an external cloud provider.
pub const CLOUD_TAG_PREFIX: &str = "ext:";

pub fn is_system_admin_key(key: &str) -> bool {
    key.starts_with(SYSTEM_ADMIN_PREFIX)
}

/// The reserved form of `key`.
pub fn sysadmin_key(key: &str) -> String {
    format!("{}{}", SYSTEM_ADMIN_PREFIX, key)
}

pub fn is_cloud_tag_key(key: &str) -> bool {
    key.starts_with(CLOUD_TAG_PREFIX)
}

/// One stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataValue {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// All metadata of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub object: ResourceRef,
    /// Project of the first writer; scopes [`MetadataStore::list`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub entries: BTreeMap<String, MetadataValue>,
}

/// A key whose value changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataChange {
    pub key: String,
    pub old_value: String,
    pub new_value: String,
}

/// A single key of a single object, as returned by [`MetadataStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataEntry {
    pub object: ResourceRef,
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Scan filter for [`MetadataStore::list`].
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    /// Resource keywords to include; empty means all.
    pub resources: Vec<String>,
    /// Only these keys; empty means all.
    pub keys: Vec<String>,
    /// Include system-reserved keys.
    pub with_sys: bool,
    /// Include external cloud tags.
    pub with_cloud: bool,
}

impl MetadataFilter {
    fn accepts(&self, object: &ResourceRef, key: &str) -> bool {
        if !self.resources.is_empty() && !self.resources.iter().any(|r| *r == object.keyword) {
            return false;
        }
        if !self.keys.is_empty() && !self.keys.iter().any(|k| k == key) {
            return false;
        }
        if is_system_admin_key(key) && !self.with_sys {
            return false;
        }
        if is_cloud_tag_key(key) && !self.with_cloud {
            return false;
        }
        true
    }
}

/// File-backed metadata store.
pub struct MetadataStore {
    layout: StateContext,
    locks: LockManager,
    audit: Arc<dyn AuditSink>,
}

impl MetadataStore {
    pub fn new(layout: &StateContext, locks: LockManager, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            layout: layout.clone(),
            locks,
            audit,
        }
    }

    /// Set several keys of `obj` at once.
    ///
    /// Every key is checked before anything is written: a system key set by
    /// a non-admin fails the whole call with [`EngineError::Forbidden`].
    /// Values equal to the stored ones are not rewritten and produce no
    /// change. Returns the changes, one `set_metadata` audit event each.
    pub fn set_all(
        &self,
        ctx: &CallContext,
        obj: &ResourceRef,
        values: &Map<String, Value>,
        actor: &Identity,
    ) -> Result<Vec<MetadataChange>> {
        for key in values.keys() {
            check_key(key, actor)?;
        }

        let _guard = self.locks.lock_object(ctx, obj)?;
        let mut doc = self.load(obj)?;
        let now = Utc::now();

        let mut changes = Vec::new();
        for (key, value) in values {
            let new_value = normalize_value(value);
            let old_value = doc
                .entries
                .get(key)
                .map(|e| e.value.clone())
                .unwrap_or_default();
            if old_value == new_value {
                continue;
            }

            if new_value.is_empty() {
                doc.entries.remove(key);
            } else {
                doc.entries.insert(
                    key.clone(),
                    MetadataValue {
                        value: new_value.clone(),
                        updated_at: now,
                    },
                );
            }
            changes.push(MetadataChange {
                key: key.clone(),
                old_value,
                new_value,
            });
        }

        if changes.is_empty() {
            debug!(object = %obj, "metadata unchanged");
            return Ok(changes);
        }

        if doc.project.is_none() {
            doc.project = actor.project.clone();
        }
        self.save(&doc)?;
        for change in &changes {
            self.audit_change(obj, actor, EventAction::SetMetadata, change);
        }
        Ok(changes)
    }

    /// Set one key.
    pub fn set_value(
        &self,
        ctx: &CallContext,
        obj: &ResourceRef,
        key: &str,
        value: &str,
        actor: &Identity,
    ) -> Result<Option<MetadataChange>> {
        let mut values = Map::new();
        values.insert(key.to_string(), Value::String(value.to_string()));
        Ok(self.set_all(ctx, obj, &values, actor)?.pop())
    }

    /// Clear every value of `obj`, one `del_metadata` audit event per key.
    ///
    /// Used when the object itself is deleted, so system keys go too.
    pub fn remove_all(
        &self,
        ctx: &CallContext,
        obj: &ResourceRef,
        actor: &Identity,
    ) -> Result<Vec<MetadataChange>> {
        let _guard = self.locks.lock_object(ctx, obj)?;
        let mut doc = self.load(obj)?;

        let changes: Vec<MetadataChange> = std::mem::take(&mut doc.entries)
            .into_iter()
            .filter(|(_, entry)| !entry.value.is_empty())
            .map(|(key, entry)| MetadataChange {
                key,
                old_value: entry.value,
                new_value: String::new(),
            })
            .collect();

        if changes.is_empty() {
            return Ok(changes);
        }

        self.save(&doc)?;
        for change in &changes {
            self.audit_change(obj, actor, EventAction::DelMetadata, change);
        }
        Ok(changes)
    }

    /// Non-empty values of `obj`, restricted to `keys` unless empty.
    ///
    /// System keys are only returned to admins, with the prefix stripped.
    pub fn get_all(
        &self,
        obj: &ResourceRef,
        keys: &[&str],
        actor: &Identity,
    ) -> Result<BTreeMap<String, String>> {
        let doc = self.load(obj)?;
        let mut out = BTreeMap::new();
        for (key, entry) in doc.entries {
            if entry.value.is_empty() || (!keys.is_empty() && !keys.contains(&key.as_str())) {
                continue;
            }
            match key.strip_prefix(SYSTEM_ADMIN_PREFIX) {
                Some(stripped) if actor.allows_system_keys() => {
                    out.insert(stripped.to_string(), entry.value);
                }
                Some(_) => {}
                None => {
                    out.insert(key, entry.value);
                }
            }
        }
        Ok(out)
    }

    /// Value of one key; `None` when unset or hidden from `actor`.
    pub fn get_string_value(
        &self,
        obj: &ResourceRef,
        key: &str,
        actor: &Identity,
    ) -> Result<Option<String>> {
        if is_system_admin_key(key) && !actor.allows_system_keys() {
            return Ok(None);
        }
        let doc = self.load(obj)?;
        Ok(doc
            .entries
            .get(key)
            .map(|e| e.value.clone())
            .filter(|v| !v.is_empty()))
    }

    /// Value of one key parsed as JSON; `None` when unset, hidden, or not
    /// valid JSON.
    pub fn get_json_value(
        &self,
        obj: &ResourceRef,
        key: &str,
        actor: &Identity,
    ) -> Result<Option<Value>> {
        let Some(raw) = self.get_string_value(obj, key, actor)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                debug!(object = %obj, key, error = %e, "metadata value is not JSON");
                Ok(None)
            }
        }
    }

    /// Scan the metadata of every object visible to `actor`.
    ///
    /// Non-admins only see objects owned by their own project. A malformed
    /// resource keyword in the filter is a [`EngineError::ValidationError`].
    pub fn list(&self, filter: &MetadataFilter, actor: &Identity) -> Result<Vec<MetadataEntry>> {
        for keyword in &filter.resources {
            ResourceRef::validate_keyword(keyword)?;
        }

        let dir = &self.layout.metadata_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(dir).map_err(|e| {
            EngineError::StoreError(format!(
                "failed to read metadata directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                EngineError::StoreError(format!("failed to read metadata directory entry: {}", e))
            })?;
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let doc: MetadataDocument = match read_json(&path) {
                Ok(Some(doc)) => doc,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable metadata document");
                    continue;
                }
            };
            if !actor.can_view_project(doc.project.as_deref()) {
                continue;
            }

            for (key, value) in doc.entries {
                if value.value.is_empty() || !filter.accepts(&doc.object, &key) {
                    continue;
                }
                out.push(MetadataEntry {
                    object: doc.object.clone(),
                    key,
                    value: value.value,
                    updated_at: value.updated_at,
                });
            }
        }

        out.sort_by(|a, b| a.object.cmp(&b.object).then_with(|| a.key.cmp(&b.key)));
        Ok(out)
    }

    fn load(&self, obj: &ResourceRef) -> Result<MetadataDocument> {
        let path = self.layout.metadata_path(&obj.resource_key());
        Ok(read_json(&path)?.unwrap_or_else(|| MetadataDocument {
            object: obj.clone(),
            project: None,
            entries: BTreeMap::new(),
        }))
    }

    fn save(&self, doc: &MetadataDocument) -> Result<()> {
        atomic_write_json(self.layout.metadata_path(&doc.object.resource_key()), doc)
    }

    fn audit_change(
        &self,
        obj: &ResourceRef,
        actor: &Identity,
        action: EventAction,
        change: &MetadataChange,
    ) {
        let event = Event::new(action)
            .with_actor(&actor.name)
            .with_target(obj)
            .with_details(json!({
                "key": change.key,
                "old_value": change.old_value,
                "new_value": change.new_value,
            }));
        if let Err(e) = self.audit.record(&event) {
            warn!(object = %obj, key = %change.key, error = %e, "failed to record metadata event");
        }
    }
}

fn check_key(key: &str, actor: &Identity) -> Result<()> {
    if key.trim().is_empty() {
        return Err(EngineError::ValidationError(
            "metadata key must not be empty".to_string(),
        ));
    }
    if is_system_admin_key(key) && !actor.allows_system_keys() {
        return Err(EngineError::Forbidden(format!(
            "ordinary users cannot set keys beginning with '{}': '{}'",
            SYSTEM_ADMIN_PREFIX, key
        )));
    }
    Ok(())
}

/// Stored string form of a value. `none` and `null` mean unset.
fn normalize_value(value: &Value) -> String {
    let raw = match value {
        Value::Null => return String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("null") {
        String::new()
    } else {
        raw
    }
}
