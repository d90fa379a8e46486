//! Resource store collaborator: the only way the controller observes or
//! mutates the platform.

use std::collections::BTreeMap;

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};

use crate::{LedgerCluster, Result};

/// Typed access to cluster resources, pods and deployments.
///
/// `get_*` map a missing object to `Ok(None)`. `create_*` fail with
/// [`Error::AlreadyExists`](crate::Error::AlreadyExists) and `delete_*` with
/// [`Error::NotFound`](crate::Error::NotFound); every other failure is
/// [`Error::CollaboratorUnavailable`](crate::Error::CollaboratorUnavailable).
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<LedgerCluster>>;
    /// Persist `cluster.status` only.
    async fn update_cluster_status(&self, cluster: &LedgerCluster) -> Result<LedgerCluster>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;
    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>>;
    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment>;
    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment>;
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;
}
