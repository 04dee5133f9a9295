//! Implementation of the `taskman lock` commands.

use super::open_state;
use crate::cli::LockClearArgs;
use serde_json::json;
use taskman::context::StateContext;
use taskman::error::{EngineError, Result};
use taskman::events::{AuditSink, Event, EventAction, FileAuditSink};
use taskman::locks::{LockInfo, LockManager};
use taskman::resource::ResourceRef;

/// Execute the `taskman lock list` command.
pub fn cmd_lock_list(layout: &StateContext) -> Result<()> {
    let config = open_state(layout)?;
    let locks = LockManager::open(layout, &config).list_locks()?;

    if locks.is_empty() {
        println!("No active locks.");
        return Ok(());
    }

    println!("Active locks ({}):", locks.len());
    println!();

    for lock in &locks {
        print_lock(lock, "  ");
        if lock.is_stale {
            println!(
                "    Status:     STALE (exceeds {} min threshold)",
                config.lock_stale_minutes
            );
        }
        println!();
    }

    let stale_count = locks.iter().filter(|l| l.is_stale).count();
    if stale_count > 0 {
        println!(
            "Note: {} lock(s) are stale. Use `taskman lock clear <key> --force` to clear.",
            stale_count
        );
    }

    Ok(())
}

/// Execute the `taskman lock clear` command.
pub fn cmd_lock_clear(layout: &StateContext, args: LockClearArgs) -> Result<()> {
    if !args.force {
        return Err(EngineError::ValidationError(format!(
            "refusing to clear lock without --force flag.\n\n\
             Clearing a lock held by a live process breaks mutual exclusion on the resource.\n\
             Only clear locks if you are certain the holder has crashed.\n\n\
             To clear the lock, run:\n  taskman lock clear {} --force",
            args.key
        )));
    }

    let config = open_state(layout)?;
    let cleared = LockManager::open(layout, &config).clear_lock(&args.key)?;

    let mut event = Event::new(EventAction::LockClear).with_details(json!({
        "key": cleared.key,
        "age_minutes": cleared.metadata.age().num_minutes(),
        "was_stale": cleared.is_stale,
        "force": args.force,
        "owner": cleared.metadata.owner,
        "token": cleared.metadata.token,
    }));
    if let Ok(resource) = ResourceRef::parse_key(&cleared.key) {
        event = event.with_target(&resource);
    }

    // The lock is already gone; a failed audit write must not hide that.
    if let Err(e) = FileAuditSink::new(layout).record(&event) {
        eprintln!("Warning: failed to log lock_clear event: {}", e);
    }

    println!("Cleared lock: {}", cleared.key);
    println!();
    println!("Lock details:");
    print_lock(&cleared, "");
    if cleared.is_stale {
        println!("  Status:     was STALE");
    }

    Ok(())
}

fn print_lock(lock: &LockInfo, indent: &str) {
    println!("{}{}:", indent, lock.key);
    println!("{}  Owner:      {}", indent, lock.metadata.owner);
    if let Some(pid) = lock.metadata.pid {
        println!("{}  PID:        {}", indent, pid);
    }
    println!(
        "{}  Created:    {}",
        indent,
        lock.metadata.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("{}  Age:        {}", indent, lock.metadata.age_string());
    if let Some(path) = &lock.path {
        println!("{}  Path:       {}", indent, path.display());
    }
}
