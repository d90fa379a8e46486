//! Reconciliation control loop: one pass per cluster notification.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use stratum_core::{ClusterKey, LedgerClusterStatus, ResourceStore, Result, Role, Stage};
use stratum_wallet::Generator;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::inspector::{canonical_order, list_live_nodes};
use crate::stage::StageMachine;

/// What the caller should do once a pass finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Run again after this delay; `None` means wait for the next change notification.
    pub requeue_after: Option<Duration>,
}

pub struct Reconciler<S: ?Sized> {
    store: Arc<S>,
    generator: Generator,
    config: ControllerConfig,
}

impl<S> Reconciler<S>
where
    S: ResourceStore + ?Sized,
{
    pub fn new(store: Arc<S>, generator: Generator, config: ControllerConfig) -> Self {
        Self { store, generator, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub async fn reconcile(&self, key: &ClusterKey) -> Result<Outcome> {
        let started = Instant::now();
        counter!("reconcile_total", 1u64);
        let res = self.pass(key).await;
        histogram!("reconcile_ms", started.elapsed().as_secs_f64() * 1000.0);
        if let Err(e) = &res {
            counter!("reconcile_errors_total", 1u64);
            warn!(cluster = %key, error = %e, "reconcile pass failed");
        }
        res
    }

    async fn pass(&self, key: &ClusterKey) -> Result<Outcome> {
        let Some(mut cluster) = self.store.get_cluster(&key.namespace, &key.name).await? else {
            debug!(cluster = %key, "cluster gone; nothing to do");
            return Ok(Outcome::default());
        };

        let current = cluster.stage();
        if current == Stage::Uninitialized {
            counter!("stage_transitions_total", 1u64, "to" => Stage::Genesis.as_str());
            info!(cluster = %key, "first observation; entering genesis");
            cluster.status = Some(LedgerClusterStatus { stage: Stage::Genesis, nodes: Vec::new() });
            self.store.update_cluster_status(&cluster).await?;
            return Ok(Outcome::default());
        }

        let step = StageMachine::new(self.store.as_ref(), &self.generator, &self.config, &cluster).run(current).await?;

        let mut nodes = list_live_nodes(self.store.as_ref(), key, Role::Node).await?;
        canonical_order(&mut nodes);
        let names: Vec<String> = nodes.into_iter().map(|n| n.name).collect();

        if step.next != current || names.as_slice() != cluster.node_names() {
            if step.next != current {
                counter!("stage_transitions_total", 1u64, "to" => step.next.as_str());
                info!(cluster = %key, from = %current, to = %step.next, "stage transition");
            }
            cluster.status = Some(LedgerClusterStatus { stage: step.next, nodes: names });
            self.store.update_cluster_status(&cluster).await?;
        }

        Ok(Outcome { requeue_after: step.requeue })
    }
}
