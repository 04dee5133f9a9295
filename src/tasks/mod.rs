//! Built-in task types.

pub mod clouduser_sync;

use crate::error::Result;
use crate::registry::TaskRegistry;
use crate::resource::StatusSink;
use std::sync::Arc;

pub use clouduser_sync::{CloudUser, CloudUserProvider};

/// Register every built-in task type.
pub fn register_all(
    registry: &mut TaskRegistry,
    cloud_users: Arc<dyn CloudUserProvider>,
    statuses: Arc<dyn StatusSink>,
) -> Result<()> {
    clouduser_sync::register(registry, cloud_users, statuses)
}
