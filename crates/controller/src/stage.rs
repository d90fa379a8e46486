//! Stage state machine: Genesis -> Bootstrap -> Ready, with reversion whenever
//! the store shows a prerequisite has disappeared.

use std::time::Duration;

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
use metrics::counter;
use stratum_core::error::Benign;
use stratum_core::{labels_for, ClusterKey, LedgerCluster, ManagedPod, ResourceStore, Result, Role, Stage, ROLE_BENCHMARK};
use stratum_wallet::Generator;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::inspector::{canonical_order, list_live_nodes};
use crate::planner::{free_indices, plan, ScalingAction};
use crate::workload::{self, join_host_port, RANDOM_WALLET};

/// Result of one stage handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub next: Stage,
    pub requeue: Option<Duration>,
}

impl Step {
    fn to(next: Stage) -> Self {
        Self { next, requeue: None }
    }

    fn wait(next: Stage, delay: Duration) -> Self {
        Self { next, requeue: Some(delay) }
    }
}

pub struct StageMachine<'a, S: ?Sized> {
    store: &'a S,
    generator: &'a Generator,
    config: &'a ControllerConfig,
    cluster: &'a LedgerCluster,
    key: ClusterKey,
}

impl<'a, S> StageMachine<'a, S>
where
    S: ResourceStore + ?Sized,
{
    pub fn new(store: &'a S, generator: &'a Generator, config: &'a ControllerConfig, cluster: &'a LedgerCluster) -> Self {
        Self { store, generator, config, cluster, key: cluster.key() }
    }

    pub async fn run(&self, stage: Stage) -> Result<Step> {
        match stage {
            Stage::Uninitialized => Ok(Step::to(Stage::Genesis)),
            Stage::Genesis => self.genesis().await,
            Stage::Bootstrap => self.bootstrap().await,
            Stage::Ready => self.ready().await,
        }
    }

    fn ns(&self) -> &str {
        &self.key.namespace
    }

    fn name(&self) -> &str {
        &self.key.name
    }

    async fn genesis(&self) -> Result<Step> {
        if self.cluster.spec.desired_size() == 0 {
            self.teardown().await?;
            return Ok(Step::to(Stage::Genesis));
        }

        let Some(pod) = self.store.get_pod(self.ns(), self.name()).await? else {
            let genesis = self.generator.generate_genesis(self.cluster.spec.rich_wallets)?;
            let pod = workload::bootstrap_pod(self.cluster, self.config, &genesis);
            if self.store.create_pod(&pod).await.tolerate_exists()?.is_some() {
                counter!("pods_created_total", 1u64, "role" => "bootstrap");
                info!(cluster = %self.key, "creating bootstrap node");
            }
            return Ok(Step::to(Stage::Genesis));
        };

        let view = ManagedPod::from_pod(&pod);
        if view.terminating {
            debug!(cluster = %self.key, "previous bootstrap node still terminating");
            return Ok(Step::wait(Stage::Genesis, self.config.wait_delay));
        }
        if !view.is_live() {
            warn!(cluster = %self.key, phase = ?view.phase, "bootstrap node exited; replacing it");
            self.delete_pod(&view.name).await?;
            return Ok(Step::to(Stage::Genesis));
        }
        match view.ip {
            None => {
                debug!(cluster = %self.key, "waiting for bootstrap node address");
                Ok(Step::wait(Stage::Genesis, self.config.wait_delay))
            }
            Some(ip) => {
                info!(cluster = %self.key, bootstrap_pod = %view.name, bootstrap_ip = %ip, "bootstrap node is available");
                Ok(Step::to(Stage::Bootstrap))
            }
        }
    }

    async fn bootstrap(&self) -> Result<Step> {
        if self.cluster.spec.desired_size() == 0 {
            self.teardown().await?;
            return Ok(Step::to(Stage::Genesis));
        }

        let Some((pod, view)) = self.live_bootstrap().await? else {
            info!(cluster = %self.key, "bootstrap node missing; restarting from genesis");
            return Ok(Step::to(Stage::Genesis));
        };
        let Some(ip) = view.ip.as_deref() else {
            return Ok(Step::wait(Stage::Bootstrap, self.config.wait_delay));
        };
        let target = join_host_port(ip, self.config.node_port);

        match self.store.get_deployment(self.ns(), self.name()).await? {
            None => {
                let fresh = self.render_fleet(&pod, &target)?;
                if self.store.create_deployment(&fresh).await.tolerate_exists()?.is_some() {
                    info!(cluster = %self.key, bootstrap = %target, replicas = self.cluster.spec.fleet_replicas(), "setting up node fleet");
                }
                Ok(Step::to(Stage::Bootstrap))
            }
            Some(mut live) if workload::bootstrap_target(&live) != Some(target.as_str()) => {
                info!(cluster = %self.key, from = ?workload::bootstrap_target(&live), to = %target, "pointing fleet at new bootstrap node");
                workload::retarget(&mut live, self.render_fleet(&pod, &target)?);
                self.store.update_deployment(&live).await?;
                Ok(Step::to(Stage::Bootstrap))
            }
            Some(_) => {
                info!(cluster = %self.key, "node fleet deployed");
                Ok(Step::to(Stage::Ready))
            }
        }
    }

    async fn ready(&self) -> Result<Step> {
        let spec = &self.cluster.spec;
        if spec.desired_size() == 0 {
            self.teardown().await?;
            return Ok(Step::to(Stage::Genesis));
        }

        let Some((_, view)) = self.live_bootstrap().await? else {
            warn!(cluster = %self.key, "bootstrap node disappeared; restarting from genesis");
            return Ok(Step::to(Stage::Genesis));
        };
        let Some(mut deployment) = self.store.get_deployment(self.ns(), self.name()).await? else {
            warn!(cluster = %self.key, "node fleet disappeared; redeploying");
            return Ok(Step::to(Stage::Bootstrap));
        };
        let stale = view
            .ip
            .as_deref()
            .map(|ip| workload::bootstrap_target(&deployment) != Some(join_host_port(ip, self.config.node_port).as_str()))
            .unwrap_or(false);
        if stale {
            info!(cluster = %self.key, "fleet targets an old bootstrap address");
            return Ok(Step::to(Stage::Bootstrap));
        }

        let want = spec.fleet_replicas();
        let have = deployment.spec.as_ref().and_then(|s| s.replicas);
        if have != Some(want) {
            info!(cluster = %self.key, from = ?have, to = want, "resizing node fleet");
            if let Some(s) = deployment.spec.as_mut() {
                s.replicas = Some(want);
            }
            self.store.update_deployment(&deployment).await?;
            return Ok(Step::to(Stage::Ready));
        }

        let requeue = self.reconcile_benchmarks().await?;
        Ok(Step { next: Stage::Ready, requeue })
    }

    /// Converge benchmark pods once the node fleet is complete.
    async fn reconcile_benchmarks(&self) -> Result<Option<Duration>> {
        let desired = self.cluster.spec.benchmark_pods;
        let benches = list_live_nodes(self.store, &self.key, Role::Benchmark).await?;
        if benches.len() as u32 == desired {
            return Ok(None);
        }

        let mut nodes = list_live_nodes(self.store, &self.key, Role::Node).await?;
        canonical_order(&mut nodes);
        let size = self.cluster.spec.desired_size() as usize;
        if nodes.len() != size || nodes.iter().any(|n| n.ip.is_none()) {
            debug!(cluster = %self.key, live = nodes.len(), size, "waiting for node fleet before touching benchmarks");
            return Ok(Some(self.config.wait_delay));
        }
        if desired as usize > nodes.len() {
            warn!(cluster = %self.key, benchmark_pods = desired, cluster_size = nodes.len(), "more benchmark pods requested than nodes; reconfigure the cluster");
            return Ok(None);
        }

        self.clear_exited_benchmarks().await?;
        match plan(desired, &benches) {
            ScalingAction::NoOp => {}
            ScalingAction::ScaleDown { targets } => {
                for target in targets {
                    self.delete_pod(&target.name).await?;
                    info!(cluster = %self.key, pod = %target.name, "deleted benchmark pod");
                }
            }
            action @ ScalingAction::ScaleUp { .. } => {
                let mut blocked = false;
                for index in free_indices(&benches, action.new_indices().count()) {
                    let Some(node) = nodes.get(index as usize) else { continue };
                    let host = join_host_port(node.ip.as_deref().unwrap_or_default(), self.config.api_port);
                    let wallet = match self.generator.load_wallet(index + 1)? {
                        Some(w) => w.encode(),
                        None => RANDOM_WALLET.to_string(),
                    };
                    let pod = workload::benchmark_pod(self.cluster, self.config, index, &host, &wallet);
                    if self.store.create_pod(&pod).await.tolerate_exists()?.is_some() {
                        counter!("pods_created_total", 1u64, "role" => "benchmark");
                        info!(cluster = %self.key, pod = ?pod.metadata.name, target = %node.name, "created benchmark pod");
                    } else {
                        blocked = true;
                    }
                }
                if blocked {
                    debug!(cluster = %self.key, "benchmark slot still held by a departing pod");
                    return Ok(Some(self.config.wait_delay));
                }
            }
        }
        Ok(None)
    }

    /// Finished benchmark pods keep their name; delete them so their index can be reused.
    async fn clear_exited_benchmarks(&self) -> Result<()> {
        let pods = self.store.list_pods(self.ns(), &labels_for(self.name(), ROLE_BENCHMARK)).await?;
        for pod in pods.iter().map(ManagedPod::from_pod).filter(|p| !p.is_live() && !p.terminating) {
            debug!(cluster = %self.key, pod = %pod.name, phase = ?pod.phase, "clearing exited benchmark pod");
            self.delete_pod(&pod.name).await?;
        }
        Ok(())
    }

    async fn live_bootstrap(&self) -> Result<Option<(Pod, ManagedPod)>> {
        let pod = self.store.get_pod(self.ns(), self.name()).await?;
        Ok(pod.map(|p| {
            let view = ManagedPod::from_pod(&p);
            (p, view)
        })
        .filter(|(_, view)| view.is_live()))
    }

    fn render_fleet(&self, bootstrap: &Pod, target: &str) -> Result<Deployment> {
        let genesis = match workload::genesis_of(bootstrap) {
            Some(g) => g,
            None => self.generator.generate_genesis(self.cluster.spec.rich_wallets)?,
        };
        Ok(workload::fleet_deployment(self.cluster, self.config, &genesis, target))
    }

    async fn delete_pod(&self, name: &str) -> Result<bool> {
        let gone = self.store.delete_pod(self.ns(), name).await.tolerate_missing()?.is_some();
        if gone {
            counter!("pods_deleted_total", 1u64);
        }
        Ok(gone)
    }

    /// Remove the bootstrap node, the fleet and every benchmark pod.
    async fn teardown(&self) -> Result<()> {
        let mut removed = 0usize;
        if self.delete_pod(self.name()).await? {
            removed += 1;
        }
        if self.store.delete_deployment(self.ns(), self.name()).await.tolerate_missing()?.is_some() {
            removed += 1;
        }
        let benches = self.store.list_pods(self.ns(), &labels_for(self.name(), ROLE_BENCHMARK)).await?;
        for pod in benches.iter().map(ManagedPod::from_pod).filter(|p| !p.terminating) {
            if self.delete_pod(&pod.name).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(cluster = %self.key, removed, "cluster scaled to zero; tore down workload");
        }
        Ok(())
    }
}
