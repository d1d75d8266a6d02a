//! Container runtime client

use std::collections::HashMap;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::process::{run_shell, CommandOutput, LogSink};
use crate::errors::EngineError;

/// Restart policy applied to deployment containers
pub const RESTART_ALWAYS: &str = "always";

/// Parameters of a container launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    /// Port the service listens on inside the container; the host side is
    /// assigned by the engine
    pub container_port: u16,
    pub restart_policy: String,
}

/// A container confirmed running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// External process and container engine operations the pipeline needs.
///
/// One instance is shared by every concurrently running pipeline.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Run a shell command, streaming combined output to `sink`
    async fn run_command(
        &self,
        command: &str,
        working_dir: &Path,
        env: &HashMap<String, String>,
        sink: LogSink,
    ) -> Result<CommandOutput, EngineError>;

    /// Build an image from `context_dir` (which contains the Dockerfile)
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), EngineError>;

    /// Push an image to its registry
    async fn push_image(&self, tag: &str) -> Result<(), EngineError>;

    /// Start a detached container and confirm it is running
    async fn run_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError>;

    /// Host port the engine mapped to `container_port`
    async fn assigned_host_port(
        &self,
        handle: &ContainerHandle,
        container_port: u16,
    ) -> Result<u16, EngineError>;

    /// Stop and delete a container
    async fn remove_container(&self, handle: &ContainerHandle) -> Result<(), EngineError>;
}

/// Runtime backed by the `docker` command line client
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker_bin: String,
    /// `Err` holds the reason the engine was unreachable at construction
    availability: Result<(), String>,
}

impl DockerCli {
    /// Check the engine; an unreachable engine still yields a usable client
    /// whose container operations fail immediately.
    pub async fn connect(docker_bin: impl Into<String>, check_timeout: Duration) -> Self {
        let docker_bin = docker_bin.into();
        let check = Command::new(&docker_bin)
            .args(["version", "--format", "{{.Server.Version}}"])
            .kill_on_drop(true)
            .output();

        let availability = match tokio::time::timeout(check_timeout, check).await {
            Ok(Ok(output)) if output.status.success() => {
                info!(
                    "Container engine available (server {})",
                    String::from_utf8_lossy(&output.stdout).trim()
                );
                Ok(())
            }
            Ok(Ok(output)) => Err(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            Ok(Err(e)) => Err(format!("Failed to run {}: {}", docker_bin, e)),
            Err(_) => Err(format!("Engine did not answer within {:?}", check_timeout)),
        };

        if let Err(reason) = &availability {
            warn!("Container engine unavailable: {}", reason);
        }

        Self {
            docker_bin,
            availability,
        }
    }

    /// A client whose container operations always fail with `reason`
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self {
            docker_bin: "docker".to_string(),
            availability: Err(reason.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.availability.is_ok()
    }

    fn ensure_available(&self) -> Result<(), EngineError> {
        self.availability
            .clone()
            .map_err(EngineError::Connectivity)
    }

    async fn docker<F>(&self, args: &[&str], on_error: F) -> Result<Output, EngineError>
    where
        F: Fn(String) -> EngineError,
    {
        self.ensure_available()?;
        debug!("{} {}", self.docker_bin, args.join(" "));

        let output = Command::new(&self.docker_bin)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::Connectivity(format!("Failed to run docker: {}", e)))?;

        if !output.status.success() {
            return Err(on_error(format!(
                "docker {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }
}

#[async_trait]
impl Runtime for DockerCli {
    async fn run_command(
        &self,
        command: &str,
        working_dir: &Path,
        env: &HashMap<String, String>,
        sink: LogSink,
    ) -> Result<CommandOutput, EngineError> {
        run_shell(command, working_dir, env, sink).await
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), EngineError> {
        let context = context_dir.to_string_lossy();
        self.docker(&["build", "--rm", "-t", tag, context.as_ref()], EngineError::PackagingError)
            .await?;
        info!("Built image {}", tag);
        Ok(())
    }

    async fn push_image(&self, tag: &str) -> Result<(), EngineError> {
        self.docker(&["push", tag], EngineError::PublishError).await?;
        info!("Pushed image {}", tag);
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError> {
        let port = spec.container_port.to_string();
        let output = self
            .docker(
                &[
                    "run",
                    "-d",
                    "--name",
                    spec.name.as_str(),
                    "-p",
                    port.as_str(),
                    "--restart",
                    spec.restart_policy.as_str(),
                    spec.image.as_str(),
                ],
                EngineError::RuntimeLaunchError,
            )
            .await?;
        let handle = ContainerHandle {
            id: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            name: spec.name.clone(),
        };

        let running = self
            .docker(
                &["inspect", "--format", "{{.State.Running}}", handle.id.as_str()],
                EngineError::RuntimeLaunchError,
            )
            .await
            .map(|inspect| String::from_utf8_lossy(&inspect.stdout).trim() == "true");

        match running {
            Ok(true) => {
                info!("Container {} running ({})", handle.name, handle.id);
                Ok(handle)
            }
            outcome => {
                if let Err(e) = self.remove_container(&handle).await {
                    warn!("Unable to remove container {}: {}", handle.name, e);
                }
                Err(outcome.err().unwrap_or_else(|| {
                    EngineError::RuntimeLaunchError(format!(
                        "Container {} is not running",
                        handle.name
                    ))
                }))
            }
        }
    }

    async fn assigned_host_port(
        &self,
        handle: &ContainerHandle,
        container_port: u16,
    ) -> Result<u16, EngineError> {
        let port_spec = format!("{}/tcp", container_port);
        let output = self
            .docker(&["port", handle.id.as_str(), port_spec.as_str()], EngineError::RuntimeLaunchError)
            .await?;
        let mapping = String::from_utf8_lossy(&output.stdout);

        parse_port_mapping(&mapping).ok_or_else(|| {
            EngineError::RuntimeLaunchError(format!(
                "No host port published for {} on {}",
                port_spec, handle.name
            ))
        })
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        self.docker(&["rm", "-f", handle.id.as_str()], EngineError::RuntimeLaunchError)
            .await?;
        info!("Removed container {}", handle.name);
        Ok(())
    }
}

/// Extract the host port from `docker port` output such as
/// `0.0.0.0:49153` or `[::]:49153`.
pub fn parse_port_mapping(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit_once(':'))
        .find_map(|(_, port)| port.parse().ok())
}
