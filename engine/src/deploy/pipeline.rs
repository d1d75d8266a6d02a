//! Build pipeline orchestrator
//!
//! Drives one deployment from `queued` to `ready` or `failed`:
//! clone, build, package, publish, run, finalize, cleanup. Any error in the
//! middle steps is caught once, here, and recorded as the `failed` status.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn, Instrument};

use crate::deploy::docker::{ContainerHandle, ContainerSpec, Runtime, RESTART_ALWAYS};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};
use crate::deploy::git::SourceFetcher;
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{Deployment, DeploymentPatch};
use crate::models::project::Project;
use crate::store::deployments::DeploymentLedger;
use crate::store::projects::ProjectLookup;
use crate::utils::short_id;

/// Registry that is never pushed to
pub const DEFAULT_REGISTRY: &str = "localhost:5000";

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Registry host prefixed to every image tag
    pub registry: String,

    /// Host name used in deployment URLs
    pub public_host: String,

    /// Port the packaged service listens on inside the container. The
    /// generated image rewrites nginx's default `listen 80` to match.
    pub container_port: u16,

    /// Base image of the generated Dockerfile
    pub base_image: String,

    /// Parent of the per-deployment working directories
    pub workspace_root: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            public_host: "localhost".to_string(),
            container_port: 80,
            base_image: "nginx:alpine".to_string(),
            workspace_root: std::env::temp_dir().join("hostengine"),
        }
    }
}

/// `{registry}/{project_id}:{deployment_id}`
pub fn image_tag(registry: &str, project_id: &str, deployment_id: &str) -> String {
    format!("{}/{}:{}", registry, project_id, deployment_id)
}

/// Container name derived from the deployment ID
pub fn container_name(deployment_id: &str) -> String {
    format!("hostengine-{}", short_id(deployment_id, 8))
}

/// Dockerfile serving the build output with nginx on `container_port`
pub fn dockerfile(base_image: &str, container_port: u16) -> String {
    let mut dockerfile = format!("FROM {}\nCOPY . /usr/share/nginx/html\n", base_image);
    if container_port != 80 {
        dockerfile.push_str(&format!(
            "RUN sed -i 's/listen\\(.*\\)80;/listen\\1{};/' /etc/nginx/conf.d/default.conf\n",
            container_port
        ));
    }
    dockerfile.push_str(&format!(
        "EXPOSE {}\nCMD [\"nginx\", \"-g\", \"daemon off;\"]\n",
        container_port
    ));
    dockerfile
}

/// A container serving the deployment
struct Launched {
    url: String,
    container: ContainerHandle,
}

/// Build pipeline orchestrator
pub struct Pipeline {
    ledger: Arc<dyn DeploymentLedger>,
    projects: Arc<dyn ProjectLookup>,
    fetcher: Arc<dyn SourceFetcher>,
    runtime: Arc<dyn Runtime>,
    settings: PipelineSettings,
}

impl Pipeline {
    /// Create a new pipeline
    pub fn new(
        ledger: Arc<dyn DeploymentLedger>,
        projects: Arc<dyn ProjectLookup>,
        fetcher: Arc<dyn SourceFetcher>,
        runtime: Arc<dyn Runtime>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            ledger,
            projects,
            fetcher,
            runtime,
            settings,
        }
    }

    /// Get the settings
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the pipeline for a deployment and return its final status.
    ///
    /// Deployments that are no longer `queued` are left untouched.
    pub async fn run(&self, deployment_id: &str) -> Result<DeploymentStatus, EngineError> {
        let span = tracing::info_span!("pipeline", deployment_id = %deployment_id);
        self.run_inner(deployment_id).instrument(span).await
    }

    async fn run_inner(&self, deployment_id: &str) -> Result<DeploymentStatus, EngineError> {
        let deployment = self
            .ledger
            .get(deployment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Deployment {}", deployment_id)))?;

        if deployment.status != DeploymentStatus::Queued {
            warn!("Deployment is {}, not queued; skipping", deployment.status);
            return Ok(deployment.status);
        }

        let mut fsm = DeploymentFsm::resume(deployment.status);
        let status = fsm.process(DeploymentEvent::Start)?;
        self.ledger.update_status(deployment_id, status).await?;
        info!("Deployment building");

        let workdir = match Dir::create_temp_in(&self.settings.workspace_root, "build").await {
            Ok(dir) => Some(dir),
            Err(e) => {
                error!("Unable to allocate working directory: {}", e);
                None
            }
        };

        let result = match &workdir {
            Some(dir) => self.execute(&deployment, dir).await,
            None => Err(EngineError::CloneError(
                "Unable to allocate working directory".to_string(),
            )),
        };

        let final_status = self.finalize(deployment_id, &mut fsm, result).await;

        if let Some(dir) = workdir {
            if let Err(e) = dir.delete().await {
                warn!("Failed to clean up {}: {}", dir.path().display(), e);
            }
        }

        Ok(final_status)
    }

    /// Record the outcome. A container whose `ready` status cannot be
    /// recorded is removed and the deployment is failed instead.
    async fn finalize(
        &self,
        deployment_id: &str,
        fsm: &mut DeploymentFsm,
        result: Result<Launched, EngineError>,
    ) -> DeploymentStatus {
        let failure = match result {
            Ok(launched) => {
                let patch = DeploymentPatch::ready(launched.url.clone());
                match self.ledger.update(deployment_id, patch).await {
                    Ok(_) => {
                        info!("Deployment ready at {}", launched.url);
                        return advance(fsm, DeploymentEvent::Succeed);
                    }
                    Err(e) => {
                        error!("Unable to record ready status: {}", e);
                        self.discard_container(&launched.container).await;
                        e
                    }
                }
            }
            Err(e) => e,
        };

        let message = failure.to_string();
        error!("Deployment failed: {}", message);
        if let Err(e) = self
            .ledger
            .update(deployment_id, DeploymentPatch::failed(message.clone()))
            .await
        {
            error!("Unable to record failed status: {}", e);
        }
        advance(fsm, DeploymentEvent::Fail(message))
    }

    async fn execute(
        &self,
        deployment: &Deployment,
        workdir: &Dir,
    ) -> Result<Launched, EngineError> {
        let project = self
            .projects
            .get(&deployment.project_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Project {}", deployment.project_id)))?;

        self.clone_source(deployment, &project, workdir).await?;
        let output_dir = self.build(deployment, &project, workdir).await?;
        let tag = self.package(deployment, &project, &output_dir).await?;
        self.publish(&tag).await?;
        self.launch(deployment, &tag).await
    }

    async fn clone_source(
        &self,
        deployment: &Deployment,
        project: &Project,
        workdir: &Dir,
    ) -> Result<(), EngineError> {
        let head = self
            .fetcher
            .fetch(&project.repository_url, &project.branch, workdir)
            .await?;

        self.ledger
            .update(&deployment.id, DeploymentPatch::commit(head.hash, head.message))
            .await?;
        Ok(())
    }

    async fn build(
        &self,
        deployment: &Deployment,
        project: &Project,
        workdir: &Dir,
    ) -> Result<Dir, EngineError> {
        let output_dir = workdir.subdir(checked_output_dir(&project.output_directory)?);

        if let Some(command) = project.build_command() {
            info!("Running build command: {}", command);
            let (tx, rx) = mpsc::unbounded_channel();
            let run = self.runtime.run_command(
                command,
                workdir.path(),
                &project.environment_variables,
                tx,
            );
            let (output, ()) = tokio::join!(run, self.stream_logs(&deployment.id, rx));
            let output = output?;

            if !output.success() {
                return Err(EngineError::BuildError(match output.exit_code {
                    Some(code) => format!("Build command exited with code {}", code),
                    None => "Build command was terminated by a signal".to_string(),
                }));
            }
        }

        output_dir.create().await.map_err(|e| {
            EngineError::BuildError(format!(
                "Unable to create output directory {}: {}",
                project.output_directory, e
            ))
        })?;
        Ok(output_dir)
    }

    /// Append streamed build output to the deployment as it arrives
    async fn stream_logs(&self, deployment_id: &str, mut rx: mpsc::UnboundedReceiver<String>) {
        while let Some(line) = rx.recv().await {
            let mut chunk = line;
            while let Ok(more) = rx.try_recv() {
                chunk.push_str(&more);
            }
            if let Err(e) = self.ledger.append_logs(deployment_id, &chunk).await {
                warn!("Unable to append build logs: {}", e);
            }
        }
    }

    async fn package(
        &self,
        deployment: &Deployment,
        project: &Project,
        output_dir: &Dir,
    ) -> Result<String, EngineError> {
        let dockerfile = dockerfile(&self.settings.base_image, self.settings.container_port);
        output_dir
            .file("Dockerfile")
            .write_string(&dockerfile)
            .await
            .map_err(|e| EngineError::PackagingError(format!("Unable to write Dockerfile: {}", e)))?;

        let tag = image_tag(&self.settings.registry, &project.id, &deployment.id);
        self.runtime.build_image(output_dir.path(), &tag).await?;
        Ok(tag)
    }

    async fn publish(&self, tag: &str) -> Result<(), EngineError> {
        if self.settings.registry == DEFAULT_REGISTRY {
            return Ok(());
        }
        self.runtime.push_image(tag).await
    }

    async fn launch(&self, deployment: &Deployment, tag: &str) -> Result<Launched, EngineError> {
        let spec = ContainerSpec {
            image: tag.to_string(),
            name: container_name(&deployment.id),
            container_port: self.settings.container_port,
            restart_policy: RESTART_ALWAYS.to_string(),
        };
        let container = self.runtime.run_container(&spec).await?;

        match self
            .runtime
            .assigned_host_port(&container, self.settings.container_port)
            .await
        {
            Ok(port) => Ok(Launched {
                url: format!("http://{}:{}", self.settings.public_host, port),
                container,
            }),
            Err(e) => {
                self.discard_container(&container).await;
                Err(e)
            }
        }
    }

    async fn discard_container(&self, container: &ContainerHandle) {
        if let Err(e) = self.runtime.remove_container(container).await {
            warn!("Unable to remove container {}: {}", container.name, e);
        }
    }
}

fn advance(fsm: &mut DeploymentFsm, event: DeploymentEvent) -> DeploymentStatus {
    match fsm.process(event) {
        Ok(status) => status,
        Err(e) => {
            error!("Unable to finalize deployment: {}", e);
            fsm.status()
        }
    }
}

/// Accept only relative output directories that stay inside the checkout
fn checked_output_dir(output_directory: &str) -> Result<&Path, EngineError> {
    let path = Path::new(output_directory);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

    if escapes {
        return Err(EngineError::BuildError(format!(
            "Output directory must be a relative path inside the repository: {}",
            output_directory
        )));
    }
    Ok(path)
}
