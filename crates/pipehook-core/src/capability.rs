//! Side-effecting collaborators.
//!
//! The webhook handler reaches the Git provider and the cluster only through
//! these traits, so tests can substitute deterministic fakes.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::WorkflowSpec;
use crate::event::RepoRef;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The file does not exist at that ref. Not a failure for callers.
    #[error("{path} not found in {repo} at {git_ref}")]
    NotFound {
        repo: String,
        path: String,
        git_ref: String,
    },

    #[error("unexpected status {status} fetching {path}: {message}")]
    Status {
        status: u16,
        path: String,
        message: String,
    },

    #[error("request failed: {0}")]
    Request(String),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid volume size: {0}")]
    InvalidSize(String),

    #[error("volume creation failed: {0}")]
    Api(String),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("pipelinerun could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("pipelinerun creation failed: {0}")]
    Api(String),
}

/// A provisioned workspace volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeHandle {
    /// Name of the created claim.
    pub name: String,
    /// Requested capacity, as a Kubernetes quantity.
    pub capacity: String,
}

/// Reads files from a repository.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_file(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: &str,
    ) -> Result<Bytes, FetchError>;
}

/// Creates workspace volumes.
#[async_trait]
pub trait VolumeCreator: Send + Sync {
    async fn create_volume(
        &self,
        namespace: &str,
        size: &str,
    ) -> Result<VolumeHandle, ProvisionError>;
}

/// Hands a workflow to the execution engine.
#[async_trait]
pub trait WorkflowSubmitter: Send + Sync {
    /// Create the workflow, returning the object as stored by the engine.
    async fn submit(
        &self,
        namespace: &str,
        workflow: &WorkflowSpec,
    ) -> Result<serde_json::Value, SubmitError>;
}
