//! The submittable workflow: a Tekton `PipelineRun` with an embedded pipeline.
//!
//! Only the subset of the Tekton `v1beta1` schema that conversion produces is
//! modelled. Field names serialize in the camelCase Tekton expects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pipeline::EnvVar;

pub const API_VERSION: &str = "tekton.dev/v1beta1";
pub const KIND: &str = "PipelineRun";

/// Annotation carrying the webhook delivery id that produced the run.
pub const HOOK_ID_ANNOTATION: &str = "pipehook.dev/hook-id";
/// Label carrying the event kind that produced the run.
pub const EVENT_LABEL: &str = "pipehook.dev/event";

/// Name of the workspace shared by every task.
pub const SOURCE_WORKSPACE: &str = "source";
/// Where the shared workspace is mounted inside steps.
pub const SOURCE_WORKSPACE_PATH: &str = "$(workspaces.source.path)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: PipelineRunSpec,
}

impl WorkflowSpec {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn hook_id(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(HOOK_ID_ANNOTATION)
            .map(|s| s.as_str())
    }

    pub fn tasks(&self) -> &[PipelineTask] {
        &self.spec.pipeline_spec.tasks
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    pub service_account_name: String,
    pub pipeline_spec: PipelineSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    pub workspaces: Vec<WorkspaceBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamSpec>,
    pub workspaces: Vec<WorkspaceDeclaration>,
    pub tasks: Vec<PipelineTask>,
}

/// A resolved parameter value on the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

/// A parameter declaration on the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
}

impl ParamSpec {
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: "string".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceDeclaration {
    pub name: String,
}

/// Binds a pipeline workspace to a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceBinding {
    pub name: String,
    pub persistent_volume_claim: PersistentVolumeClaimSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSource {
    pub claim_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTask {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_after: Vec<String>,
    pub task_spec: EmbeddedTask,
    pub workspaces: Vec<WorkspacePipelineTaskBinding>,
}

impl PipelineTask {
    pub fn steps(&self) -> &[WorkflowStep] {
        &self.task_spec.steps
    }
}

/// Maps a task-level workspace onto a pipeline-level one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspacePipelineTaskBinding {
    pub name: String,
    pub workspace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedTask {
    pub workspaces: Vec<WorkspaceDeclaration>,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub image: String,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}
