//! Implementation of the `taskman show` command.
//!
//! Prints one task record as pretty JSON, followed by its audit trail.

use super::open_state;
use crate::cli::ShowArgs;
use taskman::context::StateContext;
use taskman::error::{EngineError, Result};
use taskman::events::read_events;
use taskman::task::{FileRecordStore, RecordStore, TaskRecord};

pub(super) fn load(layout: &StateContext, task_id: &str) -> Result<TaskRecord> {
    let config = open_state(layout)?;
    FileRecordStore::open(layout, &config)?
        .get(task_id)?
        .ok_or_else(|| EngineError::NotFound(task_id.to_string()))
}

/// Execute the `taskman show` command.
pub fn cmd_show(layout: &StateContext, args: ShowArgs) -> Result<()> {
    let record = load(layout, &args.task_id)?;

    let json = serde_json::to_string_pretty(&record).map_err(|e| {
        EngineError::StoreError(format!("failed to render task '{}': {}", record.id, e))
    })?;
    println!("{}", json);

    let history: Vec<_> = read_events(layout.events_file())?
        .into_iter()
        .filter(|e| e.task.as_deref() == Some(record.id.as_str()))
        .collect();
    if !history.is_empty() {
        println!();
        println!("History:");
        for event in &history {
            println!(
                "  {} {:14} {}",
                event.ts.format("%Y-%m-%d %H:%M:%S"),
                event.action,
                event.details
            );
        }
    }

    Ok(())
}
