//! PipelineRun submission.
//!
//! Tekton is not part of `k8s-openapi`, so runs are created as dynamic objects
//! against the `tekton.dev/v1beta1` API.

use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use pipehook_core::WorkflowSpec;
use pipehook_core::capability::{SubmitError, WorkflowSubmitter};
use tracing::info;

const TEKTON_GROUP: &str = "tekton.dev";
const TEKTON_VERSION: &str = "v1beta1";
const PIPELINE_RUN_PLURAL: &str = "pipelineruns";

/// Submits PipelineRuns to the cluster.
pub struct KubeSubmitter {
    client: Client,
    resource: ApiResource,
}

impl KubeSubmitter {
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            resource: pipeline_run_resource(),
        }
    }
}

pub fn pipeline_run_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(TEKTON_GROUP, TEKTON_VERSION, pipehook_core::workflow::KIND);
    ApiResource::from_gvk_with_plural(&gvk, PIPELINE_RUN_PLURAL)
}

/// Re-encode a workflow as a dynamic object in `namespace`.
pub fn to_dynamic(namespace: &str, workflow: &WorkflowSpec) -> Result<DynamicObject, SubmitError> {
    let mut object: DynamicObject = serde_json::from_value(serde_json::to_value(workflow)?)?;
    object.metadata.namespace = Some(namespace.to_string());
    Ok(object)
}

#[async_trait]
impl WorkflowSubmitter for KubeSubmitter {
    async fn submit(
        &self,
        namespace: &str,
        workflow: &WorkflowSpec,
    ) -> Result<serde_json::Value, SubmitError> {
        let object = to_dynamic(namespace, workflow)?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.resource);

        let created = api
            .create(&PostParams::default(), &object)
            .await
            .map_err(|e| SubmitError::Api(e.to_string()))?;

        info!(
            namespace,
            name = workflow.name(),
            hook_id = workflow.hook_id().unwrap_or_default(),
            "Created PipelineRun"
        );
        Ok(serde_json::to_value(created)?)
    }
}
