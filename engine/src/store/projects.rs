//! Project lookup

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::models::project::Project;

/// Read-only project lookup
#[async_trait]
pub trait ProjectLookup: Send + Sync {
    /// Projects registered for exactly this clone URL and branch
    async fn find_by_repo_and_branch(
        &self,
        repository_url: &str,
        branch: &str,
    ) -> Result<Vec<Arc<Project>>, EngineError>;

    /// Get a project by ID
    async fn get(&self, project_id: &str) -> Result<Option<Arc<Project>>, EngineError>;
}

/// In-memory project catalog, optionally loaded from a JSON file
pub struct ProjectCatalog {
    projects: RwLock<Vec<Arc<Project>>>,
}

impl ProjectCatalog {
    /// Create a catalog from a list of projects
    pub fn new(projects: Vec<Project>) -> Self {
        Self {
            projects: RwLock::new(projects.into_iter().map(Arc::new).collect()),
        }
    }

    /// Load the catalog from a JSON array of projects. A missing file yields
    /// an empty catalog.
    pub async fn load(file: &File) -> Result<Self, EngineError> {
        if !file.exists().await {
            warn!(
                "Projects file {} not found, starting with no projects",
                file.path().display()
            );
            return Ok(Self::new(Vec::new()));
        }

        let projects: Vec<Project> = file.read_json().await.map_err(|e| {
            EngineError::ConfigError(format!(
                "Unable to read projects file {}: {}",
                file.path().display(),
                e
            ))
        })?;
        info!("Loaded {} project(s)", projects.len());
        Ok(Self::new(projects))
    }

    /// Register or replace a project
    pub fn upsert(&self, project: Project) {
        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());
        projects.retain(|p| p.id != project.id);
        projects.push(Arc::new(project));
    }

    /// Get catalog size
    pub fn len(&self) -> usize {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        projects.len()
    }

    /// Check if catalog is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProjectLookup for ProjectCatalog {
    async fn find_by_repo_and_branch(
        &self,
        repository_url: &str,
        branch: &str,
    ) -> Result<Vec<Arc<Project>>, EngineError> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        Ok(projects
            .iter()
            .filter(|p| p.repository_url == repository_url && p.branch == branch)
            .cloned()
            .collect())
    }

    async fn get(&self, project_id: &str) -> Result<Option<Arc<Project>>, EngineError> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        Ok(projects.iter().find(|p| p.id == project_id).cloned())
    }
}
