//! Startup reconciliation of deployments left behind by a previous process

use tracing::{error, info, warn};

use crate::errors::EngineError;
use crate::models::deployment::{DeploymentPatch, DeploymentStatus};
use crate::store::deployments::DeploymentLedger;
use crate::workers::dispatcher::TaskDispatcher;

pub const INTERRUPTED_MESSAGE: &str = "Deployment interrupted before completion";

/// What a reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `queued` deployments handed to the dispatcher again
    pub requeued: Vec<String>,
    /// `building` deployments moved to `failed`
    pub interrupted: Vec<String>,
}

/// Re-dispatch `queued` deployments (oldest first) and fail deployments
/// stuck in `building`, whose pipeline died with the previous process.
///
/// Must run before the dispatcher receives new work.
pub async fn reconcile(
    ledger: &dyn DeploymentLedger,
    dispatcher: &dyn TaskDispatcher,
) -> Result<ReconcileReport, EngineError> {
    let mut report = ReconcileReport::default();

    for deployment in ledger.list_by_status(DeploymentStatus::Building).await? {
        warn!(deployment_id = %deployment.id, "Marking interrupted deployment as failed");
        match ledger
            .update(&deployment.id, DeploymentPatch::failed(INTERRUPTED_MESSAGE))
            .await
        {
            Ok(_) => report.interrupted.push(deployment.id),
            Err(e) => error!(deployment_id = %deployment.id, "Unable to fail deployment: {}", e),
        }
    }

    for deployment in ledger.list_by_status(DeploymentStatus::Queued).await? {
        dispatcher.enqueue(&deployment.id).await?;
        report.requeued.push(deployment.id);
    }

    if !report.requeued.is_empty() || !report.interrupted.is_empty() {
        info!(
            "Reconciled ledger: {} requeued, {} interrupted",
            report.requeued.len(),
            report.interrupted.len()
        );
    }
    Ok(report)
}
