//! Project matching and deployment dispatch for a webhook delivery

use serde::Serialize;
use tracing::{error, info, warn};

use crate::models::deployment::{DeploymentPatch, NewDeployment};
use crate::models::event::Provider;
use crate::store::deployments::DeploymentLedger;
use crate::store::projects::ProjectLookup;
use crate::webhook::normalize::{normalize, Normalized};
use crate::webhook::signature::{verify, verify_token};
use crate::workers::dispatcher::TaskDispatcher;

/// One inbound webhook request
#[derive(Debug, Clone)]
pub struct WebhookDelivery<'a> {
    pub provider: Provider,
    /// Value of the provider's event-type header
    pub event_type: Option<&'a str>,
    /// `algorithm=hexdigest` for GitHub, the shared token for GitLab
    pub credential: Option<&'a str>,
    /// Raw, unparsed request body
    pub body: &'a [u8],
}

/// Dispatch-time outcome returned to the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebhookOutcome {
    Success {
        message: String,
        deployments: Vec<String>,
    },
    Ignored {
        reason: String,
    },
    Error {
        reason: String,
    },
}

impl WebhookOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        WebhookOutcome::Ignored {
            reason: reason.into(),
        }
    }

    fn error(reason: impl Into<String>) -> Self {
        WebhookOutcome::Error {
            reason: reason.into(),
        }
    }
}

/// Normalise a delivery, match it against registered projects and queue one
/// deployment per accepted project.
///
/// Returns once every match is evaluated and dispatched; builds run later.
pub async fn ingest(
    delivery: WebhookDelivery<'_>,
    projects: &dyn ProjectLookup,
    ledger: &dyn DeploymentLedger,
    dispatcher: &dyn TaskDispatcher,
) -> WebhookOutcome {
    let event = match normalize(delivery.provider, delivery.event_type, delivery.body) {
        Normalized::Event(event) => event,
        Normalized::NotApplicable => {
            return WebhookOutcome::ignored("Event type not supported");
        }
        Normalized::Malformed(reason) => {
            warn!(provider = ?delivery.provider, "Malformed webhook payload: {}", reason);
            return WebhookOutcome::error(reason);
        }
    };

    let matches = match projects
        .find_by_repo_and_branch(&event.repository_url, &event.branch)
        .await
    {
        Ok(matches) => matches,
        Err(e) => {
            error!("Project lookup failed: {}", e);
            return WebhookOutcome::error("Project lookup failed");
        }
    };

    if matches.is_empty() {
        info!(
            "No project registered for {} ({})",
            event.repository_url, event.branch
        );
        return WebhookOutcome::ignored("No matching projects found");
    }

    let mut dispatched = Vec::new();
    let mut rejected = 0usize;

    for project in matches {
        if let Some(secret) = project.secret() {
            let authentic = match delivery.provider {
                Provider::GitHub => verify(delivery.credential, delivery.body, secret),
                Provider::GitLab => verify_token(delivery.credential, secret),
            };
            if !authentic {
                warn!(project_id = %project.id, "Webhook signature rejected, skipping project");
                rejected += 1;
                continue;
            }
        }

        let deployment = match ledger
            .create(NewDeployment {
                project_id: project.id.clone(),
                commit_hash: event.commit_hash.clone(),
                commit_message: event.commit_message.clone(),
                user_id: None,
            })
            .await
        {
            Ok(deployment) => deployment,
            Err(e) => {
                error!(project_id = %project.id, "Unable to create deployment: {}", e);
                continue;
            }
        };

        if let Err(e) = dispatcher.enqueue(&deployment.id).await {
            error!(deployment_id = %deployment.id, "Unable to dispatch deployment: {}", e);
            let patch = DeploymentPatch::failed(format!("Unable to dispatch deployment: {}", e));
            if let Err(e) = ledger.update(&deployment.id, patch).await {
                error!(deployment_id = %deployment.id, "Unable to record dispatch failure: {}", e);
            }
            continue;
        }

        info!(
            deployment_id = %deployment.id,
            project_id = %project.id,
            "Deployment queued for {}@{}",
            event.branch,
            event.commit_hash
        );
        dispatched.push(deployment.id);
    }

    if dispatched.is_empty() {
        if rejected > 0 {
            return WebhookOutcome::ignored(
                "Signature verification failed for all matching projects",
            );
        }
        return WebhookOutcome::error("Unable to queue deployments");
    }

    WebhookOutcome::Success {
        message: "Deployment(s) triggered".to_string(),
        deployments: dispatched,
    }
}
