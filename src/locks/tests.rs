//! Tests for the locks subsystem.

use super::*;
use crate::call::CallContext;
use crate::config::EngineConfig;
use crate::context::StateContext;
use crate::error::EngineError;
use crate::resource::ResourceRef;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Create a temporary state directory and a file-backed lock manager on it.
fn create_test_manager() -> (TempDir, StateContext, LockManager) {
    let temp_dir = TempDir::new().unwrap();
    let ctx = StateContext::resolve_from(temp_dir.path()).unwrap();
    ctx.ensure_dirs().unwrap();
    let config = EngineConfig {
        lock_poll_interval_ms: 5,
        ..EngineConfig::default()
    };
    let manager = LockManager::open(&ctx, &config);
    (temp_dir, ctx, manager)
}

fn server(id: &str) -> ResourceRef {
    ResourceRef::new("server", id)
}

fn wait_for_depth(manager: &LockManager, key: &str, depth: u64) {
    let start = Instant::now();
    while manager.queue_depth(key) != depth {
        assert!(start.elapsed() < Duration::from_secs(5), "queue never reached {}", depth);
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_lock_metadata_creation() {
    let meta = LockMetadata::new("server::1");

    assert!(!meta.owner.is_empty());
    assert!(meta.owner.contains('@'));
    assert!(meta.pid.is_some());
    assert_eq!(meta.key, "server::1");
    assert!(!meta.token.is_empty());
    assert!(meta.age().num_minutes() < 1);
}

#[test]
fn test_lock_metadata_tokens_are_unique() {
    let a = LockMetadata::new("server::1");
    let b = LockMetadata::new("server::1");
    assert_ne!(a.token, b.token);
}

#[test]
fn test_lock_metadata_serialization() {
    let meta = LockMetadata::new("disk::d1");
    let json = meta.to_json().unwrap();

    assert!(json.contains("owner"));
    assert!(json.contains("created_at"));
    assert!(json.contains("disk::d1"));

    let parsed: LockMetadata = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, meta);
}

#[test]
fn test_lock_metadata_age_string() {
    let mut meta = LockMetadata::new("server::1");

    assert!(meta.age_string().contains('m'));

    meta.created_at = Utc::now() - ChronoDuration::hours(2);
    assert!(meta.age_string().contains('h'));

    meta.created_at = Utc::now() - ChronoDuration::days(3);
    assert!(meta.age_string().contains('d'));
}

#[test]
fn test_lock_metadata_is_stale() {
    let mut meta = LockMetadata::new("server::1");
    assert!(!meta.is_stale(120));

    meta.created_at = Utc::now() - ChronoDuration::minutes(150);
    assert!(meta.is_stale(120));
}

#[test]
fn test_lock_object_creates_lock_file() {
    let (_temp_dir, ctx, manager) = create_test_manager();

    let guard = manager
        .lock_object(&CallContext::background(), &server("abc"))
        .unwrap();

    let path = ctx.lock_path("server::abc");
    assert_eq!(guard.path(), Some(path.as_path()));
    assert!(path.exists());

    let meta = LockMetadata::from_file(&path).unwrap();
    assert_eq!(meta.key, "server::abc");
    assert_eq!(meta.token, guard.token());
    assert_eq!(meta.pid, Some(std::process::id()));

    drop(guard);
    assert!(!path.exists());
}

#[test]
fn test_release_object_removes_lock_file() {
    let (_temp_dir, ctx, manager) = create_test_manager();

    let guard = manager
        .lock_object(&CallContext::background(), &server("abc"))
        .unwrap();
    manager.release_object(guard).unwrap();

    assert!(!ctx.lock_path("server::abc").exists());
    assert!(manager.try_lock_object(&server("abc")).unwrap().is_some());
}

#[test]
fn test_try_lock_when_held_returns_none() {
    let (_temp_dir, _ctx, manager) = create_test_manager();

    let _guard = manager.try_lock_object(&server("abc")).unwrap().unwrap();
    assert!(manager.try_lock_object(&server("abc")).unwrap().is_none());

    // Other keys are independent.
    assert!(manager.try_lock_object(&server("other")).unwrap().is_some());
}

#[test]
fn test_lock_timeout_when_held() {
    let (_temp_dir, _ctx, manager) = create_test_manager();
    let _guard = manager
        .lock_object(&CallContext::background(), &server("abc"))
        .unwrap();

    let ctx = CallContext::with_timeout(Duration::from_millis(50));
    let start = Instant::now();
    let result = manager.lock_object(&ctx, &server("abc"));

    assert!(matches!(result, Err(EngineError::LockTimeout(_))));
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn test_timed_out_waiter_does_not_block_queue() {
    let manager = LockManager::in_memory();
    let guard = manager
        .lock_object(&CallContext::background(), &server("abc"))
        .unwrap();

    let ctx = CallContext::with_timeout(Duration::from_millis(20));
    assert!(manager.lock_object(&ctx, &server("abc")).is_err());

    drop(guard);
    let ctx = CallContext::with_timeout(Duration::from_millis(500));
    assert!(manager.lock_object(&ctx, &server("abc")).is_ok());
}

#[test]
fn test_cancel_aborts_wait() {
    let manager = LockManager::in_memory();
    let _guard = manager
        .lock_object(&CallContext::background(), &server("abc"))
        .unwrap();

    let ctx = CallContext::background();
    let waiter_ctx = ctx.clone();
    let waiter_manager = manager.clone();
    let handle = thread::spawn(move || waiter_manager.lock_object(&waiter_ctx, &server("abc")));

    wait_for_depth(&manager, "server::abc", 2);
    ctx.cancel();

    let err = handle.join().unwrap().unwrap_err();
    assert!(matches!(err, EngineError::LockTimeout(ref msg) if msg.contains("cancelled")));
}

#[test]
fn test_cross_process_exclusion() {
    // Two managers on the same directory stand in for two processes.
    let (_temp_dir, ctx, first) = create_test_manager();
    let config = EngineConfig {
        lock_poll_interval_ms: 5,
        ..EngineConfig::default()
    };
    let second = LockManager::open(&ctx, &config);

    let guard = first
        .lock_object(&CallContext::background(), &server("abc"))
        .unwrap();
    assert!(second.try_lock_object(&server("abc")).unwrap().is_none());

    let err = second
        .lock_object(
            &CallContext::with_timeout(Duration::from_millis(30)),
            &server("abc"),
        )
        .unwrap_err();
    assert!(err.to_string().contains("held by"));

    let handle = thread::spawn(move || {
        second.lock_object(
            &CallContext::with_timeout(Duration::from_secs(5)),
            &server("abc"),
        )
    });
    thread::sleep(Duration::from_millis(30));
    drop(guard);

    let guard = handle.join().unwrap().unwrap();
    assert!(ctx.lock_path("server::abc").exists());
    drop(guard);
}

#[test]
fn test_mutual_exclusion_under_contention() {
    let (_temp_dir, _ctx, manager) = create_test_manager();
    let inside = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let inside = Arc::clone(&inside);
            let entries = Arc::clone(&entries);
            thread::spawn(move || {
                for _ in 0..10 {
                    let _guard = manager
                        .lock_object(&CallContext::background(), &server("shared"))
                        .unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::sleep(Duration::from_micros(200));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    entries.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(entries.load(Ordering::SeqCst), 80);
}

#[test]
fn test_waiters_served_in_arrival_order() {
    let manager = LockManager::in_memory();
    let key = "server::fifo";
    let order = Arc::new(Mutex::new(Vec::new()));

    let holder = manager
        .lock_object(&CallContext::background(), &server("fifo"))
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..5u64 {
        let manager_clone = manager.clone();
        let order = Arc::clone(&order);
        handles.push(thread::spawn(move || {
            let _guard = manager_clone
                .lock_object(&CallContext::background(), &server("fifo"))
                .unwrap();
            order.lock().unwrap().push(i);
        }));
        wait_for_depth(&manager, key, i + 2);
    }

    drop(holder);
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(manager.queue_depth(key), 0);
}

#[test]
fn test_guard_released_on_panic() {
    let manager = LockManager::in_memory();
    let panicking = manager.clone();

    let result = thread::spawn(move || {
        let _guard = panicking
            .lock_object(&CallContext::background(), &server("abc"))
            .unwrap();
        panic!("handler blew up");
    })
    .join();
    assert!(result.is_err());

    assert!(manager.try_lock_object(&server("abc")).unwrap().is_some());
}

#[test]
fn test_release_keeps_foreign_lock_file() {
    let (_temp_dir, ctx, manager) = create_test_manager();
    let guard = manager
        .lock_object(&CallContext::background(), &server("abc"))
        .unwrap();

    // An operator clears the lock and another process takes it over.
    let path = ctx.lock_path("server::abc");
    manager.clear_lock("server::abc").unwrap();
    let foreign = LockMetadata::new("server::abc");
    std::fs::write(&path, foreign.to_json().unwrap()).unwrap();

    guard.release().unwrap();

    let still_there = LockMetadata::from_file(&path).unwrap();
    assert_eq!(still_there.token, foreign.token);
}

#[test]
fn test_list_locks() {
    let (_temp_dir, _ctx, manager) = create_test_manager();

    assert!(manager.list_locks().unwrap().is_empty());

    let _a = manager.try_lock_object(&server("b")).unwrap().unwrap();
    let _b = manager
        .try_lock_object(&ResourceRef::new("disk", "a"))
        .unwrap()
        .unwrap();

    let locks = manager.list_locks().unwrap();
    let keys: Vec<_> = locks.iter().map(|l| l.key.as_str()).collect();
    assert_eq!(keys, vec!["disk::a", "server::b"]);
    assert!(locks.iter().all(|l| !l.is_stale && l.path.is_some()));
}

#[test]
fn test_list_locks_reports_stale() {
    let (_temp_dir, ctx, manager) = create_test_manager();

    let mut meta = LockMetadata::new("server::old");
    meta.created_at = Utc::now() - ChronoDuration::hours(5);
    std::fs::write(ctx.lock_path("server::old"), meta.to_json().unwrap()).unwrap();

    let locks = manager.list_locks().unwrap();
    assert_eq!(locks.len(), 1);
    assert!(locks[0].is_stale);
    assert!(locks[0].to_string().contains("STALE"));
}

#[test]
fn test_list_locks_in_memory() {
    let manager = LockManager::in_memory();
    let _guard = manager.try_lock_object(&server("abc")).unwrap().unwrap();

    let locks = manager.list_locks().unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].key, "server::abc");
    assert!(locks[0].path.is_none());
}

#[test]
fn test_clear_lock() {
    let (_temp_dir, ctx, manager) = create_test_manager();

    let guard = manager.try_lock_object(&server("abc")).unwrap().unwrap();
    let info = manager.clear_lock("server::abc").unwrap();
    assert_eq!(info.key, "server::abc");
    assert_eq!(info.metadata.token, guard.token());
    assert!(!ctx.lock_path("server::abc").exists());

    // Clearing again fails.
    assert!(manager.clear_lock("server::abc").is_err());
}

#[test]
fn test_clear_lock_in_memory_is_rejected() {
    let manager = LockManager::in_memory();
    assert!(manager.clear_lock("server::abc").is_err());
}

#[test]
fn test_lock_rejects_empty_key_parts() {
    let manager = LockManager::in_memory();
    let result = manager.lock_object(&CallContext::background(), &ResourceRef::new("", "x"));
    assert!(matches!(result, Err(EngineError::ValidationError(_))));
}

#[test]
fn test_break_stale_file_removes_confirmed_stale() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("x.guard");
    claim_file(&path, &LockMetadata::new("old")).unwrap();

    assert!(break_stale_file(&path, |_| true).unwrap());
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
fn test_break_stale_file_restores_fresh_claim() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("x.guard");
    let fresh = LockMetadata::new("fresh");
    claim_file(&path, &fresh).unwrap();

    // The caller judged an earlier file stale, but a new claimant got in first.
    assert!(!break_stale_file(&path, |_| false).unwrap());
    let restored = LockMetadata::from_file(&path).unwrap();
    assert_eq!(restored.token, fresh.token);
    assert!(release_file(&path, &fresh.token).unwrap());
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
fn test_break_stale_file_missing_is_noop() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("gone.guard");
    assert!(!break_stale_file(&path, |_| true).unwrap());
}
