//! Actor identity carried by tasks into domain calls.

use serde::{Deserialize, Serialize};

/// Identity that authorized an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User or service name.
    pub name: String,

    /// Project the credential is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Whether the credential carries the system-admin capability.
    #[serde(default)]
    pub is_admin: bool,
}

impl Identity {
    /// Unprivileged user identity.
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            project: None,
            is_admin: false,
        }
    }

    /// Identity with the system-admin capability.
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            project: None,
            is_admin: true,
        }
    }

    /// Identity of the engine itself, used for internally triggered work.
    pub fn system() -> Self {
        Self::admin("system")
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Whether data owned by `project` is visible to this identity.
    ///
    /// Admins see everything. Anyone else only sees data of their own
    /// project; unowned data and project-less credentials see nothing.
    pub fn can_view_project(&self, project: Option<&str>) -> bool {
        if self.is_admin {
            return true;
        }
        matches!((self.project.as_deref(), project), (Some(mine), Some(theirs)) if mine == theirs)
    }

    /// Whether this identity may read or mutate system-reserved keys.
    pub fn allows_system_keys(&self) -> bool {
        self.is_admin
    }
}
