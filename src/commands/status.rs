//! Implementation of the `taskman status` command.
//!
//! Displays task counts per status and highlights for unfinished, parked or
//! undelivered tasks and for held or stale locks.

use super::{open_state, short_id};
use chrono::Utc;
use taskman::context::StateContext;
use taskman::error::Result;
use taskman::locks::{LockInfo, LockManager};
use taskman::task::{FileRecordStore, RecordStore, TaskRecord, TaskStatus};

/// Snapshot of a state directory.
pub(super) struct StatusSummary {
    pub counts: Vec<(TaskStatus, usize)>,
    pub records: Vec<TaskRecord>,
    pub locks: Vec<LockInfo>,
    pub lock_stale_minutes: u32,
}

impl StatusSummary {
    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, n)| n).sum()
    }

    fn unfinished(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.iter().filter(|r| !r.is_terminal())
    }

    pub fn waiting(&self) -> Vec<&TaskRecord> {
        self.unfinished().filter(|r| r.waiting).collect()
    }

    /// Unfinished tasks the resume scan would pick up right now.
    pub fn due(&self) -> Vec<&TaskRecord> {
        let now = Utc::now();
        self.unfinished().filter(|r| r.is_resumable(now)).collect()
    }

    pub fn scheduled(&self) -> Vec<&TaskRecord> {
        let now = Utc::now();
        self.unfinished()
            .filter(|r| r.next_run_at.is_some_and(|at| at > now))
            .collect()
    }

    pub fn undelivered(&self) -> Vec<&TaskRecord> {
        self.records
            .iter()
            .filter(|r| r.needs_parent_notification())
            .collect()
    }
}

pub(super) fn collect(layout: &StateContext) -> Result<StatusSummary> {
    let config = open_state(layout)?;
    let records = FileRecordStore::open(layout, &config)?.list()?;
    let locks = LockManager::open(layout, &config).list_locks()?;

    let counts = TaskStatus::ALL
        .iter()
        .map(|status| (*status, records.iter().filter(|r| r.status == *status).count()))
        .collect();

    Ok(StatusSummary {
        counts,
        records,
        locks,
        lock_stale_minutes: config.lock_stale_minutes,
    })
}

/// Execute the `taskman status` command.
pub fn cmd_status(layout: &StateContext) -> Result<()> {
    let summary = collect(layout)?;

    println!("Engine Status");
    println!("=============");
    println!();
    println!("State dir: {}", layout.state_dir.display());
    println!();

    println!("Tasks:");
    for (status, count) in &summary.counts {
        println!("  {:9} {:>4}", status.as_str(), count);
    }
    println!("  ---------");
    println!("  {:9} {:>4}", "total", summary.total());
    println!();

    let mut issues: Vec<String> = Vec::new();

    let due = summary.due();
    if !due.is_empty() {
        issues.push(format!("{} task(s) due for dispatch:", due.len()));
        for record in &due {
            issues.push(format!(
                "  - {} {} at '{}' ({})",
                short_id(&record.id),
                record.task_type,
                record.stage,
                record.status
            ));
        }
    }

    let waiting = summary.waiting();
    if !waiting.is_empty() {
        issues.push(format!("{} task(s) waiting on an external event:", waiting.len()));
        for record in &waiting {
            issues.push(format!(
                "  - {} {} at '{}'",
                short_id(&record.id),
                record.task_type,
                record.stage
            ));
        }
    }

    let scheduled = summary.scheduled();
    if !scheduled.is_empty() {
        issues.push(format!("{} task(s) scheduled to retry:", scheduled.len()));
        for record in &scheduled {
            if let Some(at) = record.next_run_at {
                issues.push(format!(
                    "  - {} {} at '{}' (next run {})",
                    short_id(&record.id),
                    record.task_type,
                    record.stage,
                    at.format("%Y-%m-%d %H:%M:%S UTC")
                ));
            }
        }
    }

    let undelivered = summary.undelivered();
    if !undelivered.is_empty() {
        issues.push(format!(
            "{} finished child task(s) not yet delivered to their parent",
            undelivered.len()
        ));
    }

    if !summary.locks.is_empty() {
        issues.push(format!("{} lock(s) held:", summary.locks.len()));
        for lock in &summary.locks {
            issues.push(format!("  - {}", lock));
        }
    }

    let stale = summary.locks.iter().filter(|l| l.is_stale).count();
    if stale > 0 {
        issues.push(format!(
            "{} stale lock(s) detected (older than {} minutes)",
            stale, summary.lock_stale_minutes
        ));
    }

    if !issues.is_empty() {
        println!("Highlights:");
        for issue in &issues {
            println!("  {}", issue);
        }
        println!();
    }

    if summary.total() == 0 {
        println!("No tasks recorded in this state directory.");
    } else if stale > 0 {
        println!("Commands:");
        println!("  taskman lock list            - Inspect held locks");
        println!("  taskman lock clear KEY --force - Clear a stale lock");
    }

    Ok(())
}
