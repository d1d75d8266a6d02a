//! Finite state machine for deployment status

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Created, waiting for a worker
    Queued,

    /// Pipeline in progress
    Building,

    /// Container running and reachable
    Ready,

    /// Pipeline aborted
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Ready => "ready",
            DeploymentStatus::Failed => "failed",
        }
    }

    /// `ready` and `failed` accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Ready | DeploymentStatus::Failed)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    ///
    /// Staying in place is not a transition, so a second worker trying to
    /// move a `building` deployment to `building` is refused.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        match (self, next) {
            (Queued, Building) | (Queued, Failed) => true,
            (Building, Ready) | (Building, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// A worker picked the deployment up
    Start,

    /// Container launched
    Succeed,

    /// Any step aborted the pipeline
    Fail(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    status: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in queued state
    pub fn new() -> Self {
        Self::resume(DeploymentStatus::Queued)
    }

    /// Create an FSM positioned at an already persisted status
    pub fn resume(status: DeploymentStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    /// Get current status
    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, EngineError> {
        let next = match (&self.status, &event) {
            (DeploymentStatus::Queued, DeploymentEvent::Start) => DeploymentStatus::Building,
            (DeploymentStatus::Queued, DeploymentEvent::Fail(err))
            | (DeploymentStatus::Building, DeploymentEvent::Fail(err)) => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }
            (DeploymentStatus::Building, DeploymentEvent::Succeed) => DeploymentStatus::Ready,
            (status, event) => {
                return Err(EngineError::InvalidTransition(format!(
                    "{} -> {:?}",
                    status, event
                )));
            }
        };

        self.status = next;
        Ok(next)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
