//! Command implementations for taskman.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Every command works on the state directory resolved
//! from `--state-dir` / `TASKMAN_HOME`.

mod events;
mod list;
mod lock;
mod show;
mod status;

use crate::cli::{Cli, Command, LockAction};
use taskman::config::EngineConfig;
use taskman::context::StateContext;
use taskman::error::Result;

/// Dispatch a command to its implementation.
pub fn dispatch(cli: Cli) -> Result<()> {
    let layout = StateContext::resolve(cli.state_dir.as_deref())?;

    match cli.command {
        Command::Status => status::cmd_status(&layout),
        Command::Show(args) => show::cmd_show(&layout, args),
        Command::List(args) => list::cmd_list(&layout, args),
        Command::Lock(lock_cmd) => match lock_cmd.action {
            LockAction::List => lock::cmd_lock_list(&layout),
            LockAction::Clear(args) => lock::cmd_lock_clear(&layout, args),
        },
        Command::Events(args) => events::cmd_events(&layout, args),
    }
}

/// Check the state directory exists and load its configuration.
///
/// Operator commands never create state.
fn open_state(layout: &StateContext) -> Result<EngineConfig> {
    layout.ensure_initialized()?;
    EngineConfig::load_or_default(layout.config_path())
}

/// Shorten a task id for table output.
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
