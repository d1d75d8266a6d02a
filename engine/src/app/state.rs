//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::docker::DockerCli;
use crate::deploy::git::GitFetcher;
use crate::deploy::pipeline::Pipeline;
use crate::errors::EngineError;
use crate::store::deployments::DeploymentStore;
use crate::store::projects::ProjectCatalog;

/// Main application state
pub struct AppState {
    /// Registered projects
    pub projects: Arc<ProjectCatalog>,

    /// Deployment ledger
    pub ledger: Arc<DeploymentStore>,

    /// Container engine client
    pub runtime: Arc<DockerCli>,

    /// Build pipeline shared by the workers
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, EngineError> {
        info!("Initializing application state...");

        options.storage.layout.setup().await?;

        let projects = Arc::new(ProjectCatalog::load(&options.storage.projects_file).await?);

        let ledger = if options.storage.persist_ledger {
            Arc::new(DeploymentStore::open(options.storage.ledger_file.clone()).await?)
        } else {
            Arc::new(DeploymentStore::in_memory())
        };

        let runtime = Arc::new(
            DockerCli::connect(
                options.docker_bin.clone(),
                options.lifecycle.engine_check_timeout,
            )
            .await,
        );

        let pipeline = Arc::new(Pipeline::new(
            ledger.clone(),
            projects.clone(),
            Arc::new(GitFetcher::new(options.git_bin.clone())),
            runtime.clone(),
            options.pipeline.clone(),
        ));

        Ok(Self {
            projects,
            ledger,
            runtime,
            pipeline,
        })
    }
}
