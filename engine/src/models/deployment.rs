//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::deploy::fsm::DeploymentStatus;
use crate::errors::EngineError;

/// One attempt to build and run a specific commit of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    pub project_id: String,

    /// Absent for webhook-triggered deployments
    pub user_id: Option<String>,

    pub commit_hash: String,

    pub commit_message: Option<String>,

    pub status: DeploymentStatus,

    /// Set only when `status` is `ready`
    pub deployment_url: Option<String>,

    /// Combined build output, append-only
    #[serde(default)]
    pub build_logs: String,

    /// Set only when `status` is `failed`
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a deployment is created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDeployment {
    pub project_id: String,
    pub commit_hash: String,
    pub commit_message: Option<String>,
    pub user_id: Option<String>,
}

/// The fields the pipeline may change on an existing deployment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentPatch {
    pub status: Option<DeploymentStatus>,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    /// Appended to `build_logs`; logs are never replaced or cleared
    pub append_build_logs: Option<String>,
    pub deployment_url: Option<String>,
    pub error_message: Option<String>,
}

impl DeploymentPatch {
    pub fn status(status: DeploymentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn commit(hash: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            commit_hash: Some(hash.into()),
            commit_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn logs(chunk: impl Into<String>) -> Self {
        Self {
            append_build_logs: Some(chunk.into()),
            ..Default::default()
        }
    }

    pub fn ready(deployment_url: impl Into<String>) -> Self {
        Self {
            status: Some(DeploymentStatus::Ready),
            deployment_url: Some(deployment_url.into()),
            ..Default::default()
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: Some(DeploymentStatus::Failed),
            error_message: Some(error_message.into()),
            ..Default::default()
        }
    }

    /// True when the patch only appends build output
    pub fn is_logs_only(&self) -> bool {
        self.append_build_logs.is_some()
            && self.status.is_none()
            && self.commit_hash.is_none()
            && self.commit_message.is_none()
            && self.deployment_url.is_none()
            && self.error_message.is_none()
    }
}

impl Deployment {
    /// Build a fresh `queued` deployment
    pub fn create(id: String, new: NewDeployment) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id: new.project_id,
            user_id: new.user_id,
            commit_hash: new.commit_hash,
            commit_message: new.commit_message,
            status: DeploymentStatus::Queued,
            deployment_url: None,
            build_logs: String::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a patch, rejecting status regressions.
    ///
    /// `deployment_url` and `error_message` stay mutually exclusive: reaching
    /// `failed` drops the URL and reaching `ready` drops the error.
    pub fn apply(&mut self, patch: DeploymentPatch) -> Result<(), EngineError> {
        if let Some(next) = patch.status {
            if !self.status.can_transition_to(next) {
                return Err(EngineError::InvalidTransition(format!(
                    "deployment {}: {} -> {}",
                    self.id, self.status, next
                )));
            }
        }

        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(hash) = patch.commit_hash {
            self.commit_hash = hash;
        }
        if let Some(message) = patch.commit_message {
            self.commit_message = Some(message);
        }
        if let Some(chunk) = patch.append_build_logs {
            self.build_logs.push_str(&chunk);
        }
        if let Some(url) = patch.deployment_url {
            self.deployment_url = Some(url);
        }
        if let Some(message) = patch.error_message {
            self.error_message = Some(message);
        }

        match self.status {
            DeploymentStatus::Failed => self.deployment_url = None,
            DeploymentStatus::Ready => self.error_message = None,
            _ => {}
        }

        self.updated_at = Utc::now();
        Ok(())
    }
}
