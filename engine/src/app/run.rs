//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::EngineError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::dispatcher::{self, Dispatcher};
use crate::workers::reconcile::reconcile;

/// Run the engine until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), EngineError> {
    info!("Initializing deployment engine...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start engine: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), EngineError> {
    let app_state = AppState::init(options).await?;

    if !app_state.runtime.is_available() {
        warn!("Deployments will fail until the container engine is reachable");
    }

    let dispatcher = init_worker_pool(options, &app_state, shutdown_tx, shutdown_manager)?;

    // Leftovers from a previous process go first
    reconcile(app_state.ledger.as_ref(), &dispatcher).await?;

    init_server(
        options,
        &app_state,
        dispatcher,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await
}

fn init_worker_pool(
    options: &AppOptions,
    app_state: &AppState,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Dispatcher, EngineError> {
    info!("Initializing deployment workers...");

    let (dispatcher, pool_handle) = dispatcher::start(
        &options.dispatcher,
        app_state.pipeline.clone(),
        shutdown_tx,
    );
    shutdown_manager.with_worker_pool_handle(pool_handle)?;
    Ok(dispatcher)
}

async fn init_server(
    options: &AppOptions,
    app_state: &AppState,
    dispatcher: Dispatcher,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), EngineError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(
        app_state.projects.clone(),
        app_state.ledger.clone(),
        Arc::new(dispatcher),
    );

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), EngineError>>>,
    worker_pool_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            worker_pool_handle: None,
        }
    }

    fn with_worker_pool_handle(&mut self, handle: JoinHandle<()>) -> Result<(), EngineError> {
        if self.worker_pool_handle.is_some() {
            return Err(EngineError::ShutdownError(
                "worker_pool_handle already set".to_string(),
            ));
        }
        self.worker_pool_handle = Some(handle);
        Ok(())
    }

    fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), EngineError>>,
    ) -> Result<(), EngineError> {
        if self.server_handle.is_some() {
            return Err(EngineError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), EngineError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), EngineError> {
        info!("Shutting down deployment engine...");

        // 1. Stop accepting webhooks
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| EngineError::ShutdownError(e.to_string()))??;
        }

        // 2. Let running pipelines reach a terminal state
        if let Some(handle) = self.worker_pool_handle.take() {
            handle
                .await
                .map_err(|e| EngineError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
