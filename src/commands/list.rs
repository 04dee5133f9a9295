//! Implementation of the `taskman list` command.

use super::{open_state, short_id};
use crate::cli::ListArgs;
use taskman::context::StateContext;
use taskman::error::Result;
use taskman::task::{FileRecordStore, RecordStore, TaskRecord, TaskStatus};

pub(super) fn select(layout: &StateContext, args: &ListArgs) -> Result<Vec<TaskRecord>> {
    let status = args
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()?;

    let config = open_state(layout)?;
    let store = FileRecordStore::open(layout, &config)?;
    match status {
        Some(status) => store.list_by_status(&[status]),
        None => store.list(),
    }
}

/// Execute the `taskman list` command.
pub fn cmd_list(layout: &StateContext, args: ListArgs) -> Result<()> {
    let records = select(layout, &args)?;

    if records.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!(
        "{:8}  {:9}  {:24}  {:20}  {:24}  UPDATED",
        "ID", "STATUS", "TYPE", "STAGE", "TARGET"
    );
    for record in &records {
        let mut stage = record.stage.clone();
        if record.waiting {
            stage.push_str(" (waiting)");
        }
        println!(
            "{:8}  {:9}  {:24}  {:20}  {:24}  {}",
            short_id(&record.id),
            record.status.as_str(),
            record.task_type,
            stage,
            record.target.to_string(),
            record.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    println!("{} task(s)", records.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_test_state, seed_task};
    use taskman::error::EngineError;

    #[test]
    fn test_list_all_and_by_status() {
        let (_temp_dir, layout) = create_test_state();
        seed_task(&layout, "Sync", TaskStatus::Running);
        let failed = seed_task(&layout, "Sync", TaskStatus::Failed);

        let all = select(&layout, &ListArgs { status: None }).unwrap();
        assert_eq!(all.len(), 2);

        let only_failed = select(
            &layout,
            &ListArgs {
                status: Some("FAILED".to_string()),
            },
        )
        .unwrap();
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].id, failed.id);

        assert!(cmd_list(&layout, ListArgs { status: None }).is_ok());
    }

    #[test]
    fn test_list_rejects_unknown_status() {
        let (_temp_dir, layout) = create_test_state();
        let err = cmd_list(
            &layout,
            ListArgs {
                status: Some("paused".to_string()),
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)));
    }

    #[test]
    fn test_list_empty() {
        let (_temp_dir, layout) = create_test_state();
        assert!(cmd_list(&layout, ListArgs { status: None }).is_ok());
    }
}
