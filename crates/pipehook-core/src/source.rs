//! What to check out for a run.

use serde::{Deserialize, Serialize};

use crate::Event;

/// The repository URL and revision the bootstrap checkout task fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub repo_url: String,
    /// Commit SHA or ref to check out.
    pub r#ref: String,
}

impl Source {
    pub fn new(repo_url: impl Into<String>, r#ref: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            r#ref: r#ref.into(),
        }
    }

    /// Build the source for an event: the pushed commit, or the pull request head.
    pub fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::Push(push) => Some(Self::new(&push.repo.clone_url, &push.sha)),
            Event::PullRequest(pr) => Some(Self::new(&pr.repo.clone_url, &pr.head.sha)),
            Event::Other { .. } => None,
        }
    }
}
