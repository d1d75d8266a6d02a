//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Directory for a daily rolling log file; stdout only when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Container registry host used in image tags
    #[serde(default = "default_registry")]
    pub registry: String,

    /// Host name used to build deployment URLs
    #[serde(default = "default_public_host")]
    pub public_host: String,

    /// Port the packaged service listens on inside the container
    #[serde(default = "default_container_port")]
    pub container_port: u16,

    /// Base image of generated Dockerfiles
    #[serde(default = "default_base_image")]
    pub base_image: String,

    /// Path or name of the docker client binary
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Path or name of the git binary
    #[serde(default = "default_git_bin")]
    pub git_bin: String,

    /// Number of concurrently running pipelines
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the deployment queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Project catalog; defaults to `<base_dir>/projects.json`
    #[serde(default)]
    pub projects_file: Option<PathBuf>,

    /// Ledger snapshot; defaults to `<base_dir>/deployments.json`
    #[serde(default)]
    pub ledger_file: Option<PathBuf>,

    /// Persist the ledger across restarts
    #[serde(default = "default_true")]
    pub persist_ledger: bool,
}

fn default_true() -> bool {
    true
}

fn default_registry() -> String {
    "localhost:5000".to_string()
}

fn default_public_host() -> String {
    "localhost".to_string()
}

fn default_container_port() -> u16 {
    80
}

fn default_base_image() -> String {
    "nginx:alpine".to_string()
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_git_bin() -> String {
    "git".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            registry: default_registry(),
            public_host: default_public_host(),
            container_port: default_container_port(),
            base_image: default_base_image(),
            docker_bin: default_docker_bin(),
            git_bin: default_git_bin(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            projects_file: None,
            ledger_file: None,
            persist_ledger: true,
        }
    }
}

impl Settings {
    /// Read settings from `file`, or `None` when it does not exist.
    ///
    /// Runs before logging is initialized, so it reports through its
    /// result only.
    pub async fn read(file: &File) -> Result<Option<Self>, EngineError> {
        if !file.exists().await {
            return Ok(None);
        }

        file.read_json().await.map(Some).map_err(|e| {
            EngineError::ConfigError(format!(
                "Unable to read settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}
