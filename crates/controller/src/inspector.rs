//! Node set inspector: live pods of one role for a cluster.

use stratum_core::{labels_for, ClusterKey, ManagedPod, ResourceStore, Result, Role};

/// Pods of `role` that are pending or running and not being deleted, in store order.
pub async fn list_live_nodes<S>(store: &S, cluster: &ClusterKey, role: Role) -> Result<Vec<ManagedPod>>
where
    S: ResourceStore + ?Sized,
{
    let selector = labels_for(&cluster.name, role.label());
    let pods = store.list_pods(&cluster.namespace, &selector).await?;
    Ok(pods.iter().map(ManagedPod::from_pod).filter(ManagedPod::is_live).collect())
}

/// Bootstrap first, then indexed pods by index, then the rest by name.
pub fn canonical_order(pods: &mut [ManagedPod]) {
    pods.sort_by(|a, b| {
        a.index.is_none().cmp(&b.index.is_none()).then(a.index.cmp(&b.index)).then_with(|| a.name.cmp(&b.name))
    });
}
