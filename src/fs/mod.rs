//! Filesystem utilities for taskman.
//!
//! This module provides safe filesystem operations, particularly atomic writes
//! that keep task records and metadata documents from ever being observed in a
//! partially written state.

pub mod atomic;

pub use atomic::{atomic_write, atomic_write_file, atomic_write_json, read_json};
