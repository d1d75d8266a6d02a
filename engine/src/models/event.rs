//! Canonical push event

use serde::{Deserialize, Serialize};

/// Source control provider that delivered a webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
    GitLab,
}

/// Provider-agnostic description of a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub repository_url: String,
    pub branch: String,
    pub commit_hash: String,
    pub commit_message: Option<String>,
}
