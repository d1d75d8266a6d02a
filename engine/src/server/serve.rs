//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::EngineError;
use crate::server::handlers::{
    create_deployment_handler, get_deployment_handler, github_webhook_handler,
    gitlab_webhook_handler, health_handler, project_deployments_handler,
    user_deployments_handler, version_handler,
};
use crate::server::state::ServerState;

/// Largest webhook body accepted; GitHub caps push payloads at 25 MB
pub const WEBHOOK_BODY_LIMIT: usize = 25 * 1024 * 1024;

/// Build the router without binding a listener
pub fn router(state: Arc<ServerState>) -> Router {
    let webhooks: Router<Arc<ServerState>> = Router::new()
        .route("/webhooks/github", post(github_webhook_handler))
        .route("/webhooks/gitlab", post(gitlab_webhook_handler))
        .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT));

    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Webhooks
        .merge(webhooks)
        // Deployments
        .route("/deployments", post(create_deployment_handler))
        .route("/deployments/{id}", get(get_deployment_handler))
        .route("/projects/{id}/deployments", get(project_deployments_handler))
        .route("/users/{id}/deployments", get(user_deployments_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), EngineError>>, EngineError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| EngineError::ServerError(e.to_string()))
    });

    Ok(handle)
}
