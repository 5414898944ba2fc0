//! Parsed pipeline definitions.
//!
//! These types are the in-memory form of a repository's definition file.
//! Strings in steps are kept exactly as written, placeholders included;
//! resolving them is the converter's job.

use serde::{Deserialize, Serialize};

/// A pipeline definition: an ordered list of tasks plus top-level parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Parameters exposed to the PipelineRun.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    /// Tasks, in execution order. Never empty for a parsed pipeline.
    pub tasks: Vec<Task>,
}

/// A named parameter whose value is an expression over the event context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub expression: String,
}

/// A task in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task name, unique within the pipeline.
    pub name: String,
    /// Steps, in execution order. Never empty.
    pub steps: Vec<Step>,
    /// Workspace-relative paths to archive after the steps complete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
}

impl Task {
    pub fn has_artifacts(&self) -> bool {
        !self.artifacts.is_empty()
    }
}

/// A single container invocation within a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Container image to run.
    pub image: String,
    /// Entrypoint, never empty.
    pub command: Vec<String>,
    /// Arguments passed after the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory; the converter defaults it to the workspace path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Environment variables, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
