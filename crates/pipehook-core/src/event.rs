//! Normalized webhook events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::DeliveryId;

/// Pull request actions that produce a new head commit worth building.
const BUILDABLE_PR_ACTIONS: &[&str] = &["opened", "synchronize", "reopened"];

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing field in webhook payload: {0}")]
    MissingField(&'static str),

    #[error("invalid field in webhook payload: {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

/// The kind of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Other,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Other => "other",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound webhook event, normalized from the provider payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Push(PushEvent),
    PullRequest(PullRequestEvent),
    /// Anything this service does not build, kept only for acknowledgement.
    Other {
        delivery_id: DeliveryId,
        event_type: String,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Push(_) => EventKind::Push,
            Event::PullRequest(_) => EventKind::PullRequest,
            Event::Other { .. } => EventKind::Other,
        }
    }

    pub fn delivery_id(&self) -> &DeliveryId {
        match self {
            Event::Push(push) => &push.delivery_id,
            Event::PullRequest(pr) => &pr.delivery_id,
            Event::Other { delivery_id, .. } => delivery_id,
        }
    }

    pub fn repository(&self) -> Option<&RepoRef> {
        match self {
            Event::Push(push) => Some(&push.repo),
            Event::PullRequest(pr) => Some(&pr.repo),
            Event::Other { .. } => None,
        }
    }

    /// Normalize a GitHub webhook payload.
    ///
    /// `event_type` is the `X-GitHub-Event` header. Types other than `push`
    /// and `pull_request`, branch deletions, and pull request actions that do
    /// not move the head commit are returned as [`Event::Other`].
    pub fn from_github(
        event_type: &str,
        delivery_id: DeliveryId,
        payload: &Value,
    ) -> Result<Self, WebhookError> {
        match event_type {
            "push" => {
                let deleted = payload
                    .get("deleted")
                    .and_then(|d| d.as_bool())
                    .unwrap_or(false);
                if deleted {
                    return Ok(Event::Other {
                        delivery_id,
                        event_type: "push.deleted".to_string(),
                    });
                }
                PushEvent::from_github_payload(delivery_id, payload).map(Event::Push)
            }
            "pull_request" => {
                let action = string_at(payload, &["action"], "action")?;
                if !BUILDABLE_PR_ACTIONS.contains(&action.as_str()) {
                    return Ok(Event::Other {
                        delivery_id,
                        event_type: format!("pull_request.{}", action),
                    });
                }
                PullRequestEvent::from_github_payload(delivery_id, payload).map(Event::PullRequest)
            }
            other => Ok(Event::Other {
                delivery_id,
                event_type: other.to_string(),
            }),
        }
    }
}

/// Repository identity as carried by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub clone_url: String,
}

impl RepoRef {
    fn from_github_payload(payload: &Value) -> Result<Self, WebhookError> {
        let name = string_at(payload, &["repository", "name"], "repository.name")?;
        let full_name = string_at(payload, &["repository", "full_name"], "repository.full_name")?;
        // Push payloads carry `owner.name`, everything else `owner.login`.
        let owner = optional_string_at(payload, &["repository", "owner", "login"])
            .or_else(|| optional_string_at(payload, &["repository", "owner", "name"]))
            .or_else(|| full_name.split_once('/').map(|(owner, _)| owner.to_string()))
            .ok_or(WebhookError::MissingField("repository.owner"))?;
        let clone_url = string_at(payload, &["repository", "clone_url"], "repository.clone_url")?;

        Ok(Self {
            owner,
            name,
            full_name,
            clone_url,
        })
    }
}

/// Parsed push event data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub delivery_id: DeliveryId,
    pub repo: RepoRef,
    pub r#ref: String,
    pub before: String,
    /// The commit the ref now points at.
    pub sha: String,
    pub pusher: String,
    pub sender: String,
}

impl PushEvent {
    pub fn branch(&self) -> Option<&str> {
        self.r#ref.strip_prefix("refs/heads/")
    }

    pub fn tag(&self) -> Option<&str> {
        self.r#ref.strip_prefix("refs/tags/")
    }

    /// Parse a GitHub push webhook payload.
    pub fn from_github_payload(
        delivery_id: DeliveryId,
        payload: &Value,
    ) -> Result<Self, WebhookError> {
        let r#ref = string_at(payload, &["ref"], "ref")?;
        let before = optional_string_at(payload, &["before"]).unwrap_or_default();
        let sha = optional_string_at(payload, &["after"])
            .or_else(|| optional_string_at(payload, &["head_commit", "id"]))
            .ok_or(WebhookError::MissingField("after"))?;
        let pusher = optional_string_at(payload, &["pusher", "name"])
            .unwrap_or_else(|| "unknown".to_string());
        let sender = optional_string_at(payload, &["sender", "login"]).unwrap_or_default();

        Ok(PushEvent {
            delivery_id,
            repo: RepoRef::from_github_payload(payload)?,
            r#ref,
            before,
            sha,
            pusher,
            sender,
        })
    }
}

/// One side of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub sha: String,
    pub r#ref: String,
}

/// Parsed pull request event data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub delivery_id: DeliveryId,
    pub repo: RepoRef,
    pub number: u64,
    pub action: String,
    pub title: String,
    pub head: CommitRef,
    pub base: CommitRef,
    pub sender: String,
}

impl PullRequestEvent {
    /// The ref GitHub maintains for the pull request head.
    pub fn head_ref(&self) -> String {
        format!("refs/pull/{}/head", self.number)
    }

    /// Parse a GitHub pull_request webhook payload.
    pub fn from_github_payload(
        delivery_id: DeliveryId,
        payload: &Value,
    ) -> Result<Self, WebhookError> {
        let number = payload
            .get("number")
            .or_else(|| payload.get("pull_request").and_then(|p| p.get("number")))
            .ok_or(WebhookError::MissingField("number"))?
            .as_u64()
            .ok_or_else(|| WebhookError::InvalidField {
                field: "number",
                message: "expected a positive integer".to_string(),
            })?;

        Ok(PullRequestEvent {
            delivery_id,
            repo: RepoRef::from_github_payload(payload)?,
            number,
            action: string_at(payload, &["action"], "action")?,
            title: optional_string_at(payload, &["pull_request", "title"]).unwrap_or_default(),
            head: CommitRef {
                sha: string_at(payload, &["pull_request", "head", "sha"], "pull_request.head.sha")?,
                r#ref: string_at(payload, &["pull_request", "head", "ref"], "pull_request.head.ref")?,
            },
            base: CommitRef {
                sha: string_at(payload, &["pull_request", "base", "sha"], "pull_request.base.sha")?,
                r#ref: string_at(payload, &["pull_request", "base", "ref"], "pull_request.base.ref")?,
            },
            sender: optional_string_at(payload, &["sender", "login"]).unwrap_or_default(),
        })
    }
}

fn optional_string_at(payload: &Value, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(payload, |value, key| value.get(key))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn string_at(payload: &Value, path: &[&str], field: &'static str) -> Result<String, WebhookError> {
    optional_string_at(payload, path).ok_or(WebhookError::MissingField(field))
}
