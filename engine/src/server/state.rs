//! Server state

use std::sync::Arc;

use crate::store::deployments::DeploymentLedger;
use crate::store::projects::ProjectLookup;
use crate::workers::dispatcher::TaskDispatcher;

/// Server state shared across handlers
pub struct ServerState {
    pub projects: Arc<dyn ProjectLookup>,
    pub ledger: Arc<dyn DeploymentLedger>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
}

impl ServerState {
    pub fn new(
        projects: Arc<dyn ProjectLookup>,
        ledger: Arc<dyn DeploymentLedger>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            projects,
            ledger,
            dispatcher,
        }
    }
}
