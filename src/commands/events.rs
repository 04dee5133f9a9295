//! Implementation of the `taskman events` command.

use super::{open_state, short_id};
use crate::cli::EventsArgs;
use taskman::context::StateContext;
use taskman::error::Result;
use taskman::events::{Event, read_events};

/// Matching events, oldest first, at most the last `limit`.
pub(super) fn select(layout: &StateContext, args: &EventsArgs) -> Result<Vec<Event>> {
    open_state(layout)?;
    let mut events: Vec<Event> = read_events(layout.events_file())?
        .into_iter()
        .filter(|e| match &args.task {
            Some(task) => e.task.as_deref() == Some(task.as_str()),
            None => true,
        })
        .collect();

    let skip = events.len().saturating_sub(args.limit);
    events.drain(..skip);
    Ok(events)
}

/// Execute the `taskman events` command.
pub fn cmd_events(layout: &StateContext, args: EventsArgs) -> Result<()> {
    let events = select(layout, &args)?;

    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }

    for event in &events {
        println!(
            "{}  {:16}  {:8}  {:24}  {:12}  {}",
            event.ts.format("%Y-%m-%d %H:%M:%S"),
            event.action.to_string(),
            event.task.as_deref().map(short_id).unwrap_or("-"),
            event.target.as_deref().unwrap_or("-"),
            event.actor,
            event.details
        );
    }

    Ok(())
}
