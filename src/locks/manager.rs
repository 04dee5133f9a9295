//! Lock acquisition, listing, and clearing.

use super::file::{ClaimOutcome, claim_file};
use super::guard::LockGuard;
use super::metadata::LockMetadata;
use super::types::LockInfo;
use crate::call::CallContext;
use crate::config::EngineConfig;
use crate::context::StateContext;
use crate::error::{EngineError, Result};
use crate::resource::Keyable;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// How long an in-process waiter sleeps before re-checking its context.
const TURN_WAIT_SLICE: Duration = Duration::from_millis(50);

/// FIFO ticket queue for one key.
#[derive(Debug, Default)]
struct KeyQueue {
    next_ticket: u64,
    serving: u64,
    /// Tickets whose waiters gave up before their turn came.
    abandoned: BTreeSet<u64>,
    holder: Option<LockMetadata>,
}

impl KeyQueue {
    fn advance(&mut self) {
        self.holder = None;
        self.serving += 1;
        while self.abandoned.remove(&self.serving) {
            self.serving += 1;
        }
    }

    fn is_idle(&self) -> bool {
        self.serving == self.next_ticket
    }
}

/// In-process queues shared by a manager and its guards.
#[derive(Debug, Default)]
pub(super) struct LockTable {
    queues: Mutex<HashMap<String, KeyQueue>>,
    turn: Condvar,
}

impl LockTable {
    fn queues(&self) -> MutexGuard<'_, HashMap<String, KeyQueue>> {
        // The table holds only counters; a panicking holder cannot corrupt it.
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_ticket(&self, key: &str) -> u64 {
        let mut queues = self.queues();
        let queue = queues.entry(key.to_string()).or_default();
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;
        ticket
    }

    fn try_take_ticket(&self, key: &str) -> Option<u64> {
        let mut queues = self.queues();
        let queue = queues.entry(key.to_string()).or_default();
        if !queue.is_idle() {
            return None;
        }
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;
        Some(ticket)
    }

    /// Block until `ticket` is served. Returns `false` if the context ended
    /// first, in which case the ticket has been abandoned.
    fn wait_turn(&self, ctx: &CallContext, key: &str, ticket: u64) -> bool {
        let mut queues = self.queues();
        loop {
            if queues.get(key).is_some_and(|q| q.serving == ticket) {
                return true;
            }
            if ctx.is_done() {
                drop(queues);
                self.finish(key, ticket);
                return false;
            }
            let slice = ctx.clamp(TURN_WAIT_SLICE);
            queues = self
                .turn
                .wait_timeout(queues, slice)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    fn set_holder(&self, key: &str, metadata: LockMetadata) {
        if let Some(queue) = self.queues().get_mut(key) {
            queue.holder = Some(metadata);
        }
    }

    /// Hand the key to the next waiter, or mark a waiting ticket abandoned.
    pub(super) fn finish(&self, key: &str, ticket: u64) {
        let mut queues = self.queues();
        if let Some(queue) = queues.get_mut(key) {
            if queue.serving == ticket {
                queue.advance();
            } else {
                queue.abandoned.insert(ticket);
            }
            if queue.is_idle() {
                queues.remove(key);
            }
        }
        drop(queues);
        self.turn.notify_all();
    }

    fn holders(&self) -> Vec<LockMetadata> {
        self.queues()
            .values()
            .filter_map(|q| q.holder.clone())
            .collect()
    }

    #[cfg(test)]
    fn depth(&self, key: &str) -> u64 {
        self.queues()
            .get(key)
            .map(|q| q.next_ticket - q.serving)
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct Inner {
    table: Arc<LockTable>,
    /// `None` for a process-local manager without lock files.
    layout: Option<StateContext>,
    poll_interval: Duration,
    stale_minutes: u32,
}

/// Per-resource lock manager.
///
/// Cloning is cheap; clones share the same queues.
#[derive(Debug, Clone)]
pub struct LockManager {
    inner: Arc<Inner>,
}

impl LockManager {
    /// Lock manager backed by lock files under the state directory's
    /// `locks/`, coordinating with every process using the same directory.
    pub fn open(layout: &StateContext, config: &EngineConfig) -> Self {
        Self::build(Some(layout.clone()), config)
    }

    /// Process-local lock manager.
    pub fn in_memory() -> Self {
        Self::build(None, &EngineConfig::default())
    }

    fn build(layout: Option<StateContext>, config: &EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Arc::new(LockTable::default()),
                layout,
                poll_interval: config.lock_poll_interval(),
                stale_minutes: config.lock_stale_minutes,
            }),
        }
    }

    /// Acquire the exclusive lock on `resource`, blocking until it is free.
    ///
    /// In-process waiters are served in arrival order. If the context is
    /// cancelled or its deadline passes first, returns
    /// [`EngineError::LockTimeout`] and holds nothing.
    pub fn lock_object<K: Keyable + ?Sized>(
        &self,
        ctx: &CallContext,
        resource: &K,
    ) -> Result<LockGuard> {
        let key = checked_key(resource)?;
        let table = &self.inner.table;

        let ticket = table.take_ticket(&key);
        if !table.wait_turn(ctx, &key, ticket) {
            debug!(key = %key, reason = ctx.done_reason(), "gave up waiting in lock queue");
            return Err(EngineError::LockTimeout(format!(
                "timed out waiting for lock '{}' ({})",
                key,
                ctx.done_reason()
            )));
        }

        let metadata = LockMetadata::new(&key);
        let Some(layout) = &self.inner.layout else {
            return Ok(self.granted(key, ticket, metadata, None));
        };

        let path = layout.lock_path(&key);
        let mut logged_wait = false;
        loop {
            match claim_file(&path, &metadata) {
                Ok(ClaimOutcome::Acquired) => {
                    return Ok(self.granted(key, ticket, metadata, Some(path)));
                }
                Ok(ClaimOutcome::Held(holder)) => {
                    if !logged_wait {
                        debug!(
                            key = %key,
                            holder = holder.as_ref().map(|h| h.owner.as_str()).unwrap_or("unknown"),
                            "lock held by another process, polling"
                        );
                        logged_wait = true;
                    }
                    if !ctx.sleep(self.inner.poll_interval) {
                        table.finish(&key, ticket);
                        return Err(EngineError::LockTimeout(format!(
                            "timed out waiting for lock '{}' ({}){}",
                            key,
                            ctx.done_reason(),
                            describe_holder(holder.as_ref())
                        )));
                    }
                }
                Err(e) => {
                    table.finish(&key, ticket);
                    return Err(e);
                }
            }
        }
    }

    /// Acquire the lock on `resource` only if it is free right now.
    pub fn try_lock_object<K: Keyable + ?Sized>(&self, resource: &K) -> Result<Option<LockGuard>> {
        let key = checked_key(resource)?;
        let table = &self.inner.table;

        let Some(ticket) = table.try_take_ticket(&key) else {
            return Ok(None);
        };

        let metadata = LockMetadata::new(&key);
        let Some(layout) = &self.inner.layout else {
            return Ok(Some(self.granted(key, ticket, metadata, None)));
        };

        let path = layout.lock_path(&key);
        match claim_file(&path, &metadata) {
            Ok(ClaimOutcome::Acquired) => Ok(Some(self.granted(key, ticket, metadata, Some(path)))),
            Ok(ClaimOutcome::Held(_)) => {
                table.finish(&key, ticket);
                Ok(None)
            }
            Err(e) => {
                table.finish(&key, ticket);
                Err(e)
            }
        }
    }

    /// Release a lock explicitly, reporting file removal errors.
    pub fn release_object(&self, guard: LockGuard) -> Result<()> {
        guard.release()
    }

    /// List held locks.
    ///
    /// File-backed managers report every lock file in the directory (from
    /// any process); process-local managers report their own holders.
    pub fn list_locks(&self) -> Result<Vec<LockInfo>> {
        let stale_minutes = self.inner.stale_minutes;
        let mut locks = Vec::new();

        match &self.inner.layout {
            None => {
                for metadata in self.inner.table.holders() {
                    locks.push(LockInfo {
                        key: metadata.key.clone(),
                        path: None,
                        is_stale: metadata.is_stale(stale_minutes),
                        metadata,
                    });
                }
            }
            Some(layout) => {
                if !layout.locks_dir.exists() {
                    return Ok(locks);
                }

                let entries = fs::read_dir(&layout.locks_dir).map_err(|e| {
                    EngineError::StoreError(format!(
                        "failed to read locks directory '{}': {}",
                        layout.locks_dir.display(),
                        e
                    ))
                })?;

                for entry in entries {
                    let entry = entry.map_err(|e| {
                        EngineError::StoreError(format!(
                            "failed to read locks directory entry: {}",
                            e
                        ))
                    })?;
                    let path = entry.path();

                    if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                        continue;
                    }

                    // Half-written or foreign files are skipped.
                    let Ok(metadata) = LockMetadata::from_file(&path) else {
                        continue;
                    };

                    locks.push(LockInfo {
                        key: metadata.key.clone(),
                        path: Some(path),
                        is_stale: metadata.is_stale(stale_minutes),
                        metadata,
                    });
                }
            }
        }

        locks.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(locks)
    }

    /// Forcefully remove the lock file for `key`.
    ///
    /// Operator action for locks left behind by crashed processes. The
    /// caller decides whether clearing is appropriate.
    pub fn clear_lock(&self, key: &str) -> Result<LockInfo> {
        let Some(layout) = &self.inner.layout else {
            return Err(EngineError::StoreError(
                "process-local locks cannot be cleared".to_string(),
            ));
        };

        let path = layout.lock_path(key);
        if !path.exists() {
            return Err(EngineError::StoreError(format!(
                "lock '{}' does not exist at: {}",
                key,
                path.display()
            )));
        }

        let metadata = LockMetadata::from_file(&path)?;
        let info = LockInfo {
            key: key.to_string(),
            path: Some(path.clone()),
            is_stale: metadata.is_stale(self.inner.stale_minutes),
            metadata,
        };

        fs::remove_file(&path).map_err(|e| {
            EngineError::StoreError(format!("failed to clear lock '{}': {}", path.display(), e))
        })?;

        info!(key = %key, owner = %info.metadata.owner, "lock cleared");
        Ok(info)
    }

    fn granted(
        &self,
        key: String,
        ticket: u64,
        metadata: LockMetadata,
        path: Option<std::path::PathBuf>,
    ) -> LockGuard {
        debug!(key = %key, "lock acquired");
        let token = metadata.token.clone();
        self.inner.table.set_holder(&key, metadata);
        LockGuard::new(Arc::clone(&self.inner.table), key, ticket, token, path)
    }

    #[cfg(test)]
    pub(super) fn queue_depth(&self, key: &str) -> u64 {
        self.inner.table.depth(key)
    }
}

fn checked_key<K: Keyable + ?Sized>(resource: &K) -> Result<String> {
    if resource.keyword().is_empty() || resource.object_id().is_empty() {
        return Err(EngineError::ValidationError(format!(
            "cannot lock resource with empty keyword or id: '{}'",
            resource.resource_key()
        )));
    }
    Ok(resource.resource_key())
}

fn describe_holder(holder: Option<&LockMetadata>) -> String {
    match holder {
        Some(meta) => format!(
            "; held by {} (pid {}) for {}",
            meta.owner,
            meta.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            meta.age_string()
        ),
        None => String::new(),
    }
}
