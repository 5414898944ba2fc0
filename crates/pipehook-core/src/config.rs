//! Converter configuration.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PIPELINE_RUN_PREFIX: &str = "pipehook-run-";
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";
pub const DEFAULT_VOLUME_SIZE: &str = "1Gi";
pub const DEFAULT_CHECKOUT_IMAGE: &str =
    "gcr.io/tekton-releases/github.com/tektoncd/pipeline/cmd/git-init:v0.12.1";
pub const DEFAULT_ARCHIVER_IMAGE: &str = "quay.io/pipehook/archiver:latest";

/// Length of the random suffix appended to the PipelineRun name prefix.
pub const RUN_NAME_SUFFIX_LEN: usize = 5;
/// Longest Kubernetes object name that is also a valid label value.
pub const MAX_RUN_NAME_LEN: usize = 63;

/// Options for converting pipelines into PipelineRuns.
///
/// Built once at startup and shared read-only between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Executed for tasks that have artifacts to archive.
    pub archiver_image: String,
    /// Passed to the archiver along with the artifact paths.
    pub archive_url: String,
    /// Prefix of generated PipelineRun names.
    pub pipeline_run_prefix: String,
    /// Service account the PipelineRun executes as.
    pub default_service_account_name: String,
    /// Size of the workspace volume, as a Kubernetes quantity.
    pub volume_size: String,
    /// Image providing `/ko-app/git-init` for the checkout task.
    pub checkout_image: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            archiver_image: DEFAULT_ARCHIVER_IMAGE.to_string(),
            archive_url: String::new(),
            pipeline_run_prefix: DEFAULT_PIPELINE_RUN_PREFIX.to_string(),
            default_service_account_name: DEFAULT_SERVICE_ACCOUNT.to_string(),
            volume_size: DEFAULT_VOLUME_SIZE.to_string(),
            checkout_image: DEFAULT_CHECKOUT_IMAGE.to_string(),
        }
    }
}

impl Configuration {
    /// The configured name prefix, or the default when unset.
    pub fn run_prefix(&self) -> &str {
        if self.pipeline_run_prefix.is_empty() {
            DEFAULT_PIPELINE_RUN_PREFIX
        } else {
            &self.pipeline_run_prefix
        }
    }

    /// The configured service account, or `default` when unset.
    pub fn service_account(&self) -> &str {
        if self.default_service_account_name.is_empty() {
            DEFAULT_SERVICE_ACCOUNT
        } else {
            &self.default_service_account_name
        }
    }
}
