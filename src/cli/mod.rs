//! CLI argument parsing for taskman.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// taskman: inspect and repair a task engine state directory.
///
/// Every engine process pointed at the same state directory shares its task
/// records, lock files and audit log:
/// - `tasks/` holds one JSON record per task
/// - `locks/` holds one lock file per held resource
/// - `events/events.ndjson` is the audit log
#[derive(Parser, Debug)]
#[command(name = "taskman")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// State directory (defaults to $TASKMAN_HOME, then ./.taskman).
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for taskman.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show engine status summary.
    ///
    /// Displays counts per task status, unfinished tasks, and held or
    /// stale locks.
    Status,

    /// Show one task record as JSON.
    Show(ShowArgs),

    /// List task records.
    List(ListArgs),

    /// Lock management commands.
    ///
    /// List or clear resource locks.
    Lock(LockCommand),

    /// Show entries of the audit log.
    Events(EventsArgs),
}

/// Arguments for the `show` command.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Task ID to show.
    pub task_id: String,
}

/// Arguments for the `list` command.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only tasks in this status (init, running, complete, failed).
    #[arg(short, long)]
    pub status: Option<String>,
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// List all held locks.
    ///
    /// Shows every lock file with its owner, age and staleness.
    List,

    /// Clear a specific lock.
    ///
    /// Requires --force flag to prevent accidental clearing.
    Clear(LockClearArgs),
}

/// Arguments for the `lock clear` command.
#[derive(Parser, Debug)]
pub struct LockClearArgs {
    /// Resource key whose lock should be cleared (e.g. server::abc).
    pub key: String,

    /// Force clearing the lock (required for safety).
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `events` command.
#[derive(Parser, Debug)]
pub struct EventsArgs {
    /// Only events of this task.
    #[arg(long)]
    pub task: Option<String>,

    /// Show at most the last N matching events.
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: usize,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_status() {
        let cli = Cli::try_parse_from(["taskman", "status"]).unwrap();
        assert!(matches!(cli.command, Command::Status));
        assert!(cli.state_dir.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["taskman", "status", "--state-dir", "/tmp/state", "-v"]).unwrap();
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/state")));
        assert!(cli.verbose);
    }

    #[test]
    fn parse_show() {
        let cli = Cli::try_parse_from(["taskman", "show", "abc-123"]).unwrap();
        if let Command::Show(args) = cli.command {
            assert_eq!(args.task_id, "abc-123");
        } else {
            panic!("Expected Show command");
        }
    }

    #[test]
    fn parse_show_requires_id() {
        assert!(Cli::try_parse_from(["taskman", "show"]).is_err());
    }

    #[test]
    fn parse_list_with_status() {
        let cli = Cli::try_parse_from(["taskman", "list", "--status", "running"]).unwrap();
        if let Command::List(args) = cli.command {
            assert_eq!(args.status.as_deref(), Some("running"));
        } else {
            panic!("Expected List command");
        }
    }

    #[test]
    fn parse_lock_list() {
        let cli = Cli::try_parse_from(["taskman", "lock", "list"]).unwrap();
        if let Command::Lock(lock_cmd) = cli.command {
            assert!(matches!(lock_cmd.action, LockAction::List));
        } else {
            panic!("Expected Lock command");
        }
    }

    #[test]
    fn parse_lock_clear() {
        let cli = Cli::try_parse_from(["taskman", "lock", "clear", "server::s1", "--force"]).unwrap();
        if let Command::Lock(lock_cmd) = cli.command {
            if let LockAction::Clear(args) = lock_cmd.action {
                assert_eq!(args.key, "server::s1");
                assert!(args.force);
            } else {
                panic!("Expected Clear action");
            }
        } else {
            panic!("Expected Lock command");
        }
    }

    #[test]
    fn parse_events_defaults() {
        let cli = Cli::try_parse_from(["taskman", "events"]).unwrap();
        if let Command::Events(args) = cli.command {
            assert!(args.task.is_none());
            assert_eq!(args.limit, 20);
        } else {
            panic!("Expected Events command");
        }
    }

    #[test]
    fn parse_events_with_filters() {
        let cli = Cli::try_parse_from(["taskman", "events", "--task", "t1", "-n", "5"]).unwrap();
        if let Command::Events(args) = cli.command {
            assert_eq!(args.task.as_deref(), Some("t1"));
            assert_eq!(args.limit, 5);
        } else {
            panic!("Expected Events command");
        }
    }
}
