//! Kubernetes implementations of the pipehook capability traits.

pub mod submitter;
pub mod volume;

pub use submitter::KubeSubmitter;
pub use volume::KubeVolumeCreator;

use kube::Client;

/// Connect using the ambient kubeconfig or in-cluster service account.
pub async fn default_client() -> pipehook_core::Result<Client> {
    Client::try_default()
        .await
        .map_err(|e| pipehook_core::Error::Internal(e.to_string()))
}
