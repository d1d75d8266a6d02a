//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::models::deployment::{Deployment, DeploymentPatch, NewDeployment};
use crate::models::event::Provider;
use crate::server::state::ServerState;
use crate::utils::version_info;
use crate::webhook::ingest::{ingest, WebhookDelivery, WebhookOutcome};

const GITHUB_EVENT_HEADER: &str = "x-github-event";
const GITHUB_SIGNATURE_256_HEADER: &str = "x-hub-signature-256";
const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature";
const GITLAB_EVENT_HEADER: &str = "x-gitlab-event";
const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "hostengine".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// GitHub push webhook
pub async fn github_webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<WebhookOutcome> {
    let credential = header(&headers, GITHUB_SIGNATURE_256_HEADER)
        .or_else(|| header(&headers, GITHUB_SIGNATURE_HEADER));

    let delivery = WebhookDelivery {
        provider: Provider::GitHub,
        event_type: header(&headers, GITHUB_EVENT_HEADER),
        credential,
        body: &body,
    };

    Json(
        ingest(
            delivery,
            state.projects.as_ref(),
            state.ledger.as_ref(),
            state.dispatcher.as_ref(),
        )
        .await,
    )
}

/// GitLab push webhook
pub async fn gitlab_webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<WebhookOutcome> {
    let delivery = WebhookDelivery {
        provider: Provider::GitLab,
        event_type: header(&headers, GITLAB_EVENT_HEADER),
        credential: header(&headers, GITLAB_TOKEN_HEADER),
        body: &body,
    };

    Json(
        ingest(
            delivery,
            state.projects.as_ref(),
            state.ledger.as_ref(),
            state.dispatcher.as_ref(),
        )
        .await,
    )
}

/// Manual deployment request
#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    pub project_id: String,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Queue a deployment of a registered project
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, Json<Deployment>), StatusCode> {
    let project = state
        .projects
        .get(&request.project_id)
        .await
        .map_err(|e| {
            error!("Project lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let deployment = state
        .ledger
        .create(NewDeployment {
            project_id: project.id.clone(),
            commit_hash: request.commit_hash.unwrap_or_default(),
            commit_message: request.commit_message,
            user_id: request.user_id,
        })
        .await
        .map_err(|e| {
            error!(project_id = %project.id, "Unable to create deployment: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if let Err(e) = state.dispatcher.enqueue(&deployment.id).await {
        error!(deployment_id = %deployment.id, "Unable to dispatch deployment: {}", e);
        let patch = DeploymentPatch::failed(format!("Unable to dispatch deployment: {}", e));
        let failed = state.ledger.update(&deployment.id, patch).await.map_err(|e| {
            error!(deployment_id = %deployment.id, "Unable to record dispatch failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        return Ok((StatusCode::ACCEPTED, Json(failed)));
    }

    Ok((StatusCode::ACCEPTED, Json(deployment)))
}

/// Fetch one deployment
pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<Deployment>, StatusCode> {
    state
        .ledger
        .get(&id)
        .await
        .map_err(|e| {
            error!(deployment_id = %id, "Ledger lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Deployments of a project, newest first
pub async fn project_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Deployment>>, StatusCode> {
    state.ledger.list_by_project(&id).await.map(Json).map_err(|e| {
        error!(project_id = %id, "Ledger query failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Deployments requested by a user, newest first
pub async fn user_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Deployment>>, StatusCode> {
    state.ledger.list_by_user(&id).await.map(Json).map_err(|e| {
        error!(user_id = %id, "Ledger query failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
