//! Deployment ledger: the single source of truth for pipeline status

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::{Deployment, DeploymentPatch, DeploymentStatus, NewDeployment};
use crate::utils::generate_uuid;

/// Deployment ledger interface
#[async_trait]
pub trait DeploymentLedger: Send + Sync {
    /// Create a `queued` deployment with a fresh ID
    async fn create(&self, new: NewDeployment) -> Result<Deployment, EngineError>;

    /// Get a deployment by ID
    async fn get(&self, id: &str) -> Result<Option<Deployment>, EngineError>;

    /// Apply a partial update
    async fn update(&self, id: &str, patch: DeploymentPatch) -> Result<Deployment, EngineError>;

    /// Move a deployment to a new status
    async fn update_status(
        &self,
        id: &str,
        status: DeploymentStatus,
    ) -> Result<Deployment, EngineError> {
        self.update(id, DeploymentPatch::status(status)).await
    }

    /// Append a chunk of build output
    async fn append_logs(&self, id: &str, chunk: &str) -> Result<(), EngineError> {
        self.update(id, DeploymentPatch::logs(chunk)).await.map(|_| ())
    }

    /// Deployments of a project, newest first
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Deployment>, EngineError>;

    /// Deployments attributed to a user, newest first
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Deployment>, EngineError>;

    /// Deployments currently in `status`, oldest first
    async fn list_by_status(&self, status: DeploymentStatus)
        -> Result<Vec<Deployment>, EngineError>;
}

/// Snapshot form of a deployment. Build output lives in its own file.
#[derive(Serialize)]
struct LedgerRecord<'a> {
    id: &'a str,
    project_id: &'a str,
    user_id: Option<&'a str>,
    commit_hash: &'a str,
    commit_message: Option<&'a str>,
    status: DeploymentStatus,
    deployment_url: Option<&'a str>,
    error_message: Option<&'a str>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> From<&'a Deployment> for LedgerRecord<'a> {
    fn from(d: &'a Deployment) -> Self {
        Self {
            id: &d.id,
            project_id: &d.project_id,
            user_id: d.user_id.as_deref(),
            commit_hash: &d.commit_hash,
            commit_message: d.commit_message.as_deref(),
            status: d.status,
            deployment_url: d.deployment_url.as_deref(),
            error_message: d.error_message.as_deref(),
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

/// On-disk location of a persisted ledger
struct Snapshot {
    /// JSON array of records, rewritten atomically on every record change
    records: File,
    /// `<id>.log` per deployment, appended as output arrives
    logs: Dir,
}

impl Snapshot {
    fn log_file(&self, id: &str) -> File {
        self.logs.file(&format!("{}.log", id))
    }

    async fn append_logs(&self, id: &str, chunk: &str) -> Result<(), EngineError> {
        self.log_file(id)
            .append_string(chunk)
            .await
            .map_err(|e| EngineError::StorageError(format!("Unable to write build logs: {}", e)))
    }
}

/// In-memory ledger with an optional on-disk snapshot.
///
/// With a snapshot configured, record changes rewrite the snapshot file
/// atomically while the write lock is held. Build output is appended to a
/// per-deployment log file next to it and never rewrites the snapshot.
pub struct DeploymentStore {
    entries: RwLock<HashMap<String, Deployment>>,
    snapshot: Option<Snapshot>,
}

impl DeploymentStore {
    /// Create a purely in-memory ledger
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            snapshot: None,
        }
    }

    /// Open a ledger persisted to `file`, loading existing records.
    ///
    /// Build logs are kept in the `<file stem>.logs/` directory beside it.
    pub async fn open(file: File) -> Result<Self, EngineError> {
        let snapshot = Snapshot {
            logs: Dir::new(file.path().with_extension("logs")),
            records: file,
        };

        let mut entries = HashMap::new();
        if snapshot.records.exists().await {
            let records: Vec<Deployment> = snapshot.records.read_json().await.map_err(|e| {
                EngineError::StorageError(format!(
                    "Unable to read ledger {}: {}",
                    snapshot.records.path().display(),
                    e
                ))
            })?;

            for mut deployment in records {
                let log_file = snapshot.log_file(&deployment.id);
                if log_file.exists().await {
                    deployment.build_logs = log_file.read_string().await.map_err(|e| {
                        EngineError::StorageError(format!(
                            "Unable to read build logs of {}: {}",
                            deployment.id, e
                        ))
                    })?;
                }
                entries.insert(deployment.id.clone(), deployment);
            }
            info!("Loaded {} deployment(s) from ledger", entries.len());
        }

        Ok(Self {
            entries: RwLock::new(entries),
            snapshot: Some(snapshot),
        })
    }

    async fn persist(&self, entries: &HashMap<String, Deployment>) -> Result<(), EngineError> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };

        let mut records: Vec<LedgerRecord<'_>> = entries.values().map(LedgerRecord::from).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(b.id)));
        snapshot
            .records
            .write_json_atomic(&records)
            .await
            .map_err(|e| EngineError::StorageError(format!("Unable to write ledger: {}", e)))
    }

    async fn select<F>(&self, predicate: F) -> Vec<Deployment>
    where
        F: Fn(&Deployment) -> bool,
    {
        let entries = self.entries.read().await;
        let mut selected: Vec<Deployment> =
            entries.values().filter(|d| predicate(d)).cloned().collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        selected
    }
}

#[async_trait]
impl DeploymentLedger for DeploymentStore {
    async fn create(&self, new: NewDeployment) -> Result<Deployment, EngineError> {
        let deployment = Deployment::create(generate_uuid(), new);

        let mut entries = self.entries.write().await;
        entries.insert(deployment.id.clone(), deployment.clone());
        if let Err(e) = self.persist(&entries).await {
            entries.remove(&deployment.id);
            return Err(e);
        }

        debug!(deployment_id = %deployment.id, "Deployment created");
        Ok(deployment)
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, EngineError> {
        let entries = self.entries.read().await;
        Ok(entries.get(id).cloned())
    }

    async fn update(&self, id: &str, patch: DeploymentPatch) -> Result<Deployment, EngineError> {
        if patch.is_logs_only() {
            let chunk = patch.append_build_logs.unwrap_or_default();
            self.append_logs(id, &chunk).await?;
            return self
                .get(id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("Deployment {}", id)));
        }

        let mut entries = self.entries.write().await;
        let current = entries
            .get(id)
            .ok_or_else(|| EngineError::NotFound(format!("Deployment {}", id)))?;

        let chunk = patch.append_build_logs.clone();
        let mut updated = current.clone();
        updated.apply(patch)?;

        if let (Some(snapshot), Some(chunk)) = (&self.snapshot, &chunk) {
            snapshot.append_logs(id, chunk).await?;
        }

        let previous = entries.insert(id.to_string(), updated.clone());
        if let Err(e) = self.persist(&entries).await {
            if let Some(previous) = previous {
                entries.insert(id.to_string(), previous);
            }
            return Err(e);
        }

        Ok(updated)
    }

    async fn append_logs(&self, id: &str, chunk: &str) -> Result<(), EngineError> {
        let mut entries = self.entries.write().await;
        let current = entries
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("Deployment {}", id)))?;

        if let Some(snapshot) = &self.snapshot {
            snapshot.append_logs(id, chunk).await?;
        }
        current.apply(DeploymentPatch::logs(chunk))
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Deployment>, EngineError> {
        Ok(self.select(|d| d.project_id == project_id).await)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Deployment>, EngineError> {
        Ok(self
            .select(|d| d.user_id.as_deref() == Some(user_id))
            .await)
    }

    async fn list_by_status(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<Deployment>, EngineError> {
        let mut selected = self.select(|d| d.status == status).await;
        selected.reverse();
        Ok(selected)
    }
}
