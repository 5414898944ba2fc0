//! Workspace volume provisioning.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, PostParams};
use pipehook_core::capability::{ProvisionError, VolumeCreator, VolumeHandle};
use std::collections::BTreeMap;
use tracing::info;

pub const VOLUME_NAME_PREFIX: &str = "pipehook-volume-";
const ACCESS_MODE: &str = "ReadWriteOnce";

/// Creates a PersistentVolumeClaim per run.
pub struct KubeVolumeCreator {
    client: Client,
}

impl KubeVolumeCreator {
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// The claim to create for a workspace of `size`. The API server picks the name.
pub fn volume_claim(size: &str) -> Result<PersistentVolumeClaim, ProvisionError> {
    if size.trim().is_empty() {
        return Err(ProvisionError::InvalidSize("size is empty".to_string()));
    }

    Ok(PersistentVolumeClaim {
        metadata: ObjectMeta {
            generate_name: Some(VOLUME_NAME_PREFIX.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(size.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[async_trait]
impl VolumeCreator for KubeVolumeCreator {
    async fn create_volume(
        &self,
        namespace: &str,
        size: &str,
    ) -> Result<VolumeHandle, ProvisionError> {
        let claim = volume_claim(size)?;
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);

        let created = api
            .create(&PostParams::default(), &claim)
            .await
            .map_err(|e| ProvisionError::Api(e.to_string()))?;

        let name = created
            .metadata
            .name
            .ok_or_else(|| ProvisionError::Api("created claim has no name".to_string()))?;
        info!(namespace, volume = %name, size, "Created workspace volume");

        Ok(VolumeHandle {
            name,
            capacity: size.to_string(),
        })
    }
}
