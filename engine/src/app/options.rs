//! Application configuration options

use std::time::Duration;

use crate::deploy::pipeline::PipelineSettings;
use crate::filesys::file::File;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::dispatcher;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Build pipeline settings
    pub pipeline: PipelineSettings,

    /// Worker pool options
    pub dispatcher: dispatcher::Options,

    /// Docker client binary
    pub docker_bin: String,

    /// Git binary
    pub git_bin: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        let layout = StorageLayout::default();
        Self {
            lifecycle: LifecycleOptions::default(),
            pipeline: PipelineSettings {
                workspace_root: layout.workspaces_dir().path().to_path_buf(),
                ..Default::default()
            },
            storage: StorageOptions::from_layout(layout),
            server: ServerOptions::default(),
            dispatcher: dispatcher::Options::default(),
            docker_bin: "docker".to_string(),
            git_bin: "git".to_string(),
        }
    }
}

impl AppOptions {
    /// Derive the options from a settings file rooted at `layout`
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let mut storage = StorageOptions::from_layout(layout);
        if let Some(path) = &settings.projects_file {
            storage.projects_file = File::new(path);
        }
        if let Some(path) = &settings.ledger_file {
            storage.ledger_file = File::new(path);
        }
        storage.persist_ledger = settings.persist_ledger;

        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            pipeline: PipelineSettings {
                registry: settings.registry.clone(),
                public_host: settings.public_host.clone(),
                container_port: settings.container_port,
                base_image: settings.base_image.clone(),
                workspace_root: storage.layout.workspaces_dir().path().to_path_buf(),
            },
            storage,
            dispatcher: dispatcher::Options {
                workers: settings.workers,
                queue_capacity: settings.queue_capacity,
            },
            docker_bin: settings.docker_bin.clone(),
            git_bin: settings.git_bin.clone(),
        }
    }
}

/// Lifecycle options for the engine
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,

    /// How long to wait for the container engine to answer at startup
    pub engine_check_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
            engine_check_timeout: Duration::from_secs(5),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Project catalog file
    pub projects_file: File,

    /// Ledger snapshot file
    pub ledger_file: File,

    /// Keep the ledger in `ledger_file` across restarts
    pub persist_ledger: bool,
}

impl StorageOptions {
    fn from_layout(layout: StorageLayout) -> Self {
        Self {
            projects_file: layout.projects_file(),
            ledger_file: layout.ledger_file(),
            persist_ledger: true,
            layout,
        }
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self::from_layout(StorageLayout::default())
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}
