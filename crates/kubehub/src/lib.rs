//! Stratum kubehub: API-server backed resource store and the watch wiring
//! that turns cluster, pod and deployment changes into reconcile passes.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use futures::StreamExt;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    runtime::{controller::Action, watcher, Controller},
    Client,
};
use metrics::counter;
use stratum_core::{selector_string, ClusterKey, Error, LedgerCluster, ResourceStore, Result};
use tracing::{debug, info, warn};

pub async fn get_kube_client() -> AnyResult<Client> {
    Client::try_default().await.context("building kube client from the current context")
}

fn map_err(kind: &'static str, name: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind, name),
        kube::Error::Api(ae) if ae.code == 409 => Error::already_exists(kind, name),
        other => {
            counter!("kube_errors_total", 1u64);
            Error::unavailable(other)
        }
    }
}

fn name_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> (&str, &str) {
    (meta.namespace.as_deref().unwrap_or("default"), meta.name.as_deref().unwrap_or_default())
}

/// [`ResourceStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn clusters(&self, ns: &str) -> Api<LedgerCluster> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn pods(&self, ns: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn deployments(&self, ns: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), ns)
    }
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<LedgerCluster>> {
        self.clusters(namespace).get_opt(name).await.map_err(|e| map_err("LedgerCluster", name, e))
    }

    async fn update_cluster_status(&self, cluster: &LedgerCluster) -> Result<LedgerCluster> {
        let (ns, name) = name_of(&cluster.metadata);
        let patch = serde_json::json!({ "status": cluster.status });
        self.clusters(ns)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err("LedgerCluster", name, e))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.pods(namespace).get_opt(name).await.map_err(|e| map_err("Pod", name, e))
    }

    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        let selector = selector_string(selector);
        let lp = ListParams::default().labels(&selector);
        let list = self.pods(namespace).list(&lp).await.map_err(|e| map_err("Pod", &selector, e))?;
        Ok(list.items)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let (ns, name) = name_of(&pod.metadata);
        self.pods(ns).create(&PostParams::default(), pod).await.map_err(|e| map_err("Pod", name, e))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let dp = DeleteParams { grace_period_seconds: Some(0), ..Default::default() };
        self.pods(namespace).delete(name, &dp).await.map_err(|e| map_err("Pod", name, e))?;
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        self.deployments(namespace).get_opt(name).await.map_err(|e| map_err("Deployment", name, e))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let (ns, name) = name_of(&deployment.metadata);
        self.deployments(ns)
            .create(&PostParams::default(), deployment)
            .await
            .map_err(|e| map_err("Deployment", name, e))
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let (ns, name) = name_of(&deployment.metadata);
        self.deployments(ns)
            .replace(name, &PostParams::default(), deployment)
            .await
            .map_err(|e| map_err("Deployment", name, e))
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.deployments(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| map_err("Deployment", name, e))?;
        Ok(())
    }
}

/// Timing knobs for the watch-driven loop.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Watch a single namespace, or all of them.
    pub namespace: Option<String>,
    /// Periodic re-check when a pass asked for no requeue.
    pub resync: Duration,
    /// Back-off after a failed pass.
    pub retry: Duration,
}

struct Ctx<R> {
    reconcile: R,
    opts: ControllerOptions,
}

async fn dispatch<R, Fut>(obj: Arc<LedgerCluster>, ctx: Arc<Ctx<R>>) -> Result<Action>
where
    R: Fn(ClusterKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Duration>>> + Send + 'static,
{
    // The pass reloads the resource itself; only the identity is taken from the event.
    let requeue = (ctx.reconcile)(obj.key()).await?;
    Ok(Action::requeue(requeue.unwrap_or(ctx.opts.resync)))
}

fn error_policy<R>(obj: Arc<LedgerCluster>, err: &Error, ctx: Arc<Ctx<R>>) -> Action {
    warn!(cluster = %obj.key(), error = %err, "reconcile failed; backing off");
    Action::requeue(ctx.opts.retry)
}

/// Run the controller until a termination signal arrives.
///
/// Passes for the same cluster never overlap and bursts of notifications are
/// coalesced by the runtime's queue; distinct clusters proceed in parallel.
pub async fn run_controller<R, Fut>(client: Client, opts: ControllerOptions, reconcile: R) -> AnyResult<()>
where
    R: Fn(ClusterKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Duration>>> + Send + 'static,
{
    let (clusters, pods, deployments): (Api<LedgerCluster>, Api<Pod>, Api<Deployment>) = match opts.namespace.as_deref() {
        Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client.clone(), ns), Api::namespaced(client, ns)),
        None => (Api::all(client.clone()), Api::all(client.clone()), Api::all(client)),
    };

    clusters
        .list(&ListParams::default().limit(1))
        .await
        .context("LedgerCluster CRD is not installed; run `stratumctl crd | kubectl apply -f -`")?;

    info!(ns = ?opts.namespace, "controller started");
    let ctx = Arc::new(Ctx { reconcile, opts });
    Controller::new(clusters, watcher::Config::default())
        .owns(pods, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .shutdown_on_signal()
        .run(dispatch::<R, Fut>, error_policy::<R>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(cluster = %obj.name, ns = ?obj.namespace, ?action, "reconciled"),
                Err(e) => debug!(error = %e, "controller event"),
            }
        })
        .await;
    warn!("controller stream ended");
    Ok(())
}
