//! Per-resource lock manager.
//!
//! Scoped mutual exclusion keyed by the canonical resource key
//! (`keyword::id`):
//! - Within a process, waiters on the same key are queued and served in
//!   ticket (FIFO) order.
//! - Across processes, the holder owns `locks/<encoded key>.lock`, created
//!   with **create_new** semantics. Blocked acquirers poll the file every
//!   `lock_poll_interval_ms`.
//!
//! # Lock Metadata
//!
//! Each lock file contains JSON metadata:
//! - `owner`: the owner of the lock (e.g., `user@HOST`)
//! - `pid`: the process ID
//! - `token`: unique per acquisition; release only deletes a file carrying
//!   its own token
//! - `created_at`: RFC3339 timestamp
//! - `key`: the resource key
//!
//! # RAII Guards
//!
//! Acquisition returns a [`LockGuard`]. Dropping it releases the lock on
//! every exit path, including unwinding. If file deletion fails during drop
//! a warning is logged and the program continues.

mod file;
mod guard;
mod manager;
mod metadata;
mod types;

#[cfg(test)]
mod tests;

pub use guard::LockGuard;
pub use manager::LockManager;
pub use metadata::LockMetadata;
pub use types::LockInfo;

pub(crate) use file::{ClaimOutcome, break_stale_file, claim_file, release_file};
pub(crate) use metadata::get_owner_string;
