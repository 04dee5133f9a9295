//! taskman: resumable multi-stage task engine with per-resource locking.
//!
//! A [`TaskEngine`](runtime::TaskEngine) drives long-lived operations as a
//! sequence of named stages whose continuation (`stage`, `body`) is persisted
//! after every transition, so an interrupted task resumes at exactly the stage
//! it reached. The [`LockManager`](locks::LockManager) gives handlers and
//! other subsystems exclusive access to one resource at a time, across threads
//! and across processes sharing a state directory.

pub mod call;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fs;
pub mod identity;
pub mod locks;
pub mod metadata;
pub mod registry;
pub mod resource;
pub mod runtime;
pub mod task;
pub mod tasks;

pub use error::{EngineError, Result};
