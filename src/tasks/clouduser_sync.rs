//! `ClouduserSyncstatusTask`: refresh a cloud user's status from its provider.
//!
//! Single stage. The remote user is fetched through a [`CloudUserProvider`];
//! if that works the user is marked `available` and the task completes,
//! otherwise the user is marked `unknown` with the error as reason and the
//! task fails with the same message.

use crate::error::Result;
use crate::identity::Identity;
use crate::registry::{STAGE_INIT, StageHandlerSet, TaskRegistry};
use crate::resource::{ResourceRef, ResourceStatus, StatusSink};
use crate::runtime::{Outcome, TaskContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub const TASK_TYPE: &str = "ClouduserSyncstatusTask";

/// Resource keyword of cloud users.
pub const CLOUDUSER_KEYWORD: &str = "clouduser";

/// A user as reported by the external cloud provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudUser {
    pub id: String,
    pub name: String,
}

/// Access to users on the external cloud provider.
pub trait CloudUserProvider: Send + Sync {
    /// Fetch the remote counterpart of `user`.
    ///
    /// Backend failures are [`EngineError::ExternalApiError`](crate::error::EngineError::ExternalApiError).
    fn get_cloud_user(&self, actor: &Identity, user: &ResourceRef) -> Result<CloudUser>;
}

pub fn register(
    registry: &mut TaskRegistry,
    provider: Arc<dyn CloudUserProvider>,
    statuses: Arc<dyn StatusSink>,
) -> Result<()> {
    registry.register(
        TASK_TYPE,
        StageHandlerSet::new().stage(STAGE_INIT, move |ctx, body| {
            sync_status(provider.as_ref(), statuses.as_ref(), ctx, body)
        }),
    )
}

fn sync_status(
    provider: &dyn CloudUserProvider,
    statuses: &dyn StatusSink,
    ctx: &TaskContext,
    _body: Value,
) -> Result<Outcome> {
    let user = ctx.target();
    match provider.get_cloud_user(ctx.actor(), user) {
        Ok(remote) => {
            statuses.set_status(ctx.actor(), user, ResourceStatus::AVAILABLE, "")?;
            info!(task_id = ctx.task_id(), user = %user, remote_name = %remote.name, "cloud user available");
            Ok(Outcome::complete(Value::Null))
        }
        Err(e) => {
            let reason = format!("get cloud user: {}", e);
            warn!(task_id = ctx.task_id(), user = %user, error = %e, "cloud user sync failed");
            // The API error stays the failure reason even if the status write fails.
            if let Err(se) = statuses.set_status(ctx.actor(), user, ResourceStatus::UNKNOWN, &reason) {
                warn!(task_id = ctx.task_id(), user = %user, error = %se, "failed to record cloud user status");
            }
            Ok(Outcome::fail(reason))
        }
    }
}
