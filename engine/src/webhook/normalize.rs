//! Provider payload normalisation

use serde::Deserialize;

use crate::models::event::{CanonicalEvent, Provider};

pub const REASON_INVALID_JSON: &str = "Invalid JSON payload";
pub const REASON_NO_REF: &str = "No ref found in payload";
pub const REASON_NO_REPOSITORY: &str = "No repository URL found in payload";
pub const REASON_NO_COMMITS: &str = "No commits found in payload";

/// Result of normalising one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Event(CanonicalEvent),
    /// Not a push; answered with an "ignored" outcome
    NotApplicable,
    /// A push that cannot be used; the reason is returned to the caller
    Malformed(&'static str),
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref", default)]
    git_ref: Option<String>,
    #[serde(default)]
    repository: Option<GitHubRepository>,
    #[serde(default)]
    project: Option<GitLabProject>,
    #[serde(default)]
    commits: Option<Vec<PushCommit>>,
}

#[derive(Debug, Deserialize)]
struct GitHubRepository {
    #[serde(default)]
    clone_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
    #[serde(default)]
    git_http_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushCommit {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Whether the provider's event-type header names a push
pub fn is_push_event(provider: Provider, event_type: Option<&str>) -> bool {
    match (provider, event_type) {
        (Provider::GitHub, Some(kind)) => kind.trim() == "push",
        (Provider::GitLab, Some(kind)) => kind.contains("Push Hook"),
        (_, None) => false,
    }
}

/// Turn a raw webhook body into a canonical push event.
///
/// The event type is checked before the body is parsed. The first entry of
/// the commit list is taken as the pushed commit.
pub fn normalize(provider: Provider, event_type: Option<&str>, raw_payload: &[u8]) -> Normalized {
    if !is_push_event(provider, event_type) {
        return Normalized::NotApplicable;
    }

    let payload: PushPayload = match serde_json::from_slice(raw_payload) {
        Ok(payload) => payload,
        Err(_) => return Normalized::Malformed(REASON_INVALID_JSON),
    };

    let Some(git_ref) = payload.git_ref.filter(|r| !r.is_empty()) else {
        return Normalized::Malformed(REASON_NO_REF);
    };
    let branch = git_ref
        .strip_prefix("refs/heads/")
        .unwrap_or(&git_ref)
        .to_string();

    let repository_url = match provider {
        Provider::GitHub => payload.repository.and_then(|r| r.clone_url),
        Provider::GitLab => payload.project.and_then(|p| p.git_http_url),
    };
    let Some(repository_url) = repository_url.filter(|u| !u.is_empty()) else {
        return Normalized::Malformed(REASON_NO_REPOSITORY);
    };

    let Some(latest) = payload.commits.unwrap_or_default().into_iter().next() else {
        return Normalized::Malformed(REASON_NO_COMMITS);
    };

    Normalized::Event(CanonicalEvent {
        repository_url,
        branch,
        commit_hash: latest.id.unwrap_or_default(),
        commit_message: latest.message,
    })
}
