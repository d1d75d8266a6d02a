//! Project models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A registered repository, consumed read-only by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique project ID
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Clone URL exactly as the provider emits it
    pub repository_url: String,

    /// Branch whose pushes are deployed
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Shell command run at the repository root; absent means "static files"
    #[serde(default)]
    pub build_command: Option<String>,

    /// Directory (relative to the repository root) packaged into the image
    #[serde(default = "default_output_directory")]
    pub output_directory: String,

    /// Added to the build process environment
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,

    /// Shared webhook secret. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub webhook_secret: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_output_directory() -> String {
    "dist".to_string()
}

impl Project {
    /// Create a project with default branch and output directory
    pub fn new(id: impl Into<String>, repository_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            repository_url: repository_url.into(),
            branch: default_branch(),
            build_command: None,
            output_directory: default_output_directory(),
            environment_variables: HashMap::new(),
            webhook_secret: None,
        }
    }

    /// The configured secret, treating an empty string as unset
    pub fn secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// The configured build command, treating a blank command as unset
    pub fn build_command(&self) -> Option<&str> {
        self.build_command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}
