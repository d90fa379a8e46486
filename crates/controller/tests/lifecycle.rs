#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use stratum_controller::workload::{bootstrap_pod, bootstrap_target, genesis_of};
use stratum_controller::{ControllerConfig, Outcome, Reconciler};
use stratum_core::{ClusterKey, Error, LedgerCluster, LedgerClusterSpec, ResourceStore, Stage};
use stratum_store::{Action, MemStore, Verb};
use stratum_wallet::Generator;

const NS: &str = "ledger";

struct Harness {
    store: Arc<MemStore>,
    rec: Reconciler<MemStore>,
    key: ClusterKey,
    dir: tempfile::TempDir,
}

fn cluster(size: i32, rich_wallets: u32, benchmark_pods: u32) -> LedgerCluster {
    let mut c = LedgerCluster::new("alpha", LedgerClusterSpec { size, rich_wallets, benchmark_pods });
    c.metadata.namespace = Some(NS.into());
    c
}

fn harness(size: i32, rich_wallets: u32, benchmark_pods: u32) -> Harness {
    let dir = tempfile::tempdir().expect("tmp");
    let store = Arc::new(MemStore::new());
    store.sim_apply_cluster(cluster(size, rich_wallets, benchmark_pods));
    let rec = Reconciler::new(store.clone(), Generator::new(dir.path().join("config")), ControllerConfig::default());
    Harness { store, rec, key: ClusterKey::new(NS, "alpha"), dir }
}

impl Harness {
    async fn pass(&self) -> Outcome {
        self.rec.reconcile(&self.key).await.expect("pass")
    }

    fn platform(&self) {
        self.store.sim_sync_deployments();
        self.store.sim_assign_addresses();
    }

    /// Alternate passes and platform progress until two consecutive passes
    /// issue nothing. Returns every action issued on the way.
    async fn settle(&self) -> Vec<Action> {
        let mut issued = Vec::new();
        let mut quiet = 0;
        for _ in 0..40 {
            let outcome = self.pass().await;
            self.platform();
            let journal = self.store.take_journal();
            if journal.is_empty() && outcome.requeue_after.is_none() {
                quiet += 1;
                if quiet == 2 {
                    return issued;
                }
            } else {
                quiet = 0;
            }
            issued.extend(journal);
        }
        panic!("cluster did not settle: {:?}", issued);
    }

    fn stage(&self) -> Stage {
        self.store.cluster(NS, "alpha").expect("cluster").stage()
    }

    fn nodes(&self) -> Vec<String> {
        self.store.cluster(NS, "alpha").expect("cluster").node_names().to_vec()
    }

    fn pod_ip(&self, name: &str) -> String {
        self.store.pod(NS, name).and_then(|p| p.status).and_then(|s| s.pod_ip).expect("pod ip")
    }

    fn command(&self, name: &str) -> Vec<String> {
        let pod = self.store.pod(NS, name).expect("pod");
        pod.spec.expect("spec").containers[0].command.clone().expect("command")
    }

    fn benchmarks(&self) -> Vec<String> {
        self.store.pod_names(NS).into_iter().filter(|n| n.starts_with("alpha-benchmark-")).collect()
    }

    fn apply(&self, size: i32, rich_wallets: u32, benchmark_pods: u32) {
        self.store.sim_apply_cluster(cluster(size, rich_wallets, benchmark_pods));
    }
}

fn actions(journal: &[Action]) -> Vec<(Verb, &str, &str)> {
    journal.iter().map(|a| (a.verb, a.kind.as_str(), a.name.as_str())).collect()
}

#[tokio::test]
async fn walks_genesis_bootstrap_ready() {
    let h = harness(3, 3, 0);

    h.pass().await;
    assert_eq!(h.stage(), Stage::Genesis);
    assert_eq!(actions(&h.store.take_journal()), vec![(Verb::UpdateStatus, "LedgerCluster", "alpha")]);

    h.pass().await;
    assert_eq!(
        actions(&h.store.take_journal()),
        vec![(Verb::Create, "Pod", "alpha"), (Verb::UpdateStatus, "LedgerCluster", "alpha")]
    );
    assert_eq!(h.nodes(), vec!["alpha"]);
    assert!(h.dir.path().join("config/wallet1.txt").exists());
    assert!(h.dir.path().join("config/wallet2.txt").exists());
    assert!(!h.dir.path().join("config/wallet3.txt").exists());

    // no address yet: short requeue, nothing issued
    let outcome = h.pass().await;
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(1)));
    assert!(h.store.take_journal().is_empty());
    assert_eq!(h.stage(), Stage::Genesis);

    h.store.sim_assign_addresses();
    h.pass().await;
    assert_eq!(h.stage(), Stage::Bootstrap);

    h.pass().await;
    let journal = h.store.take_journal();
    assert!(actions(&journal).contains(&(Verb::Create, "Deployment", "alpha")));
    let dep = h.store.deployment(NS, "alpha").expect("fleet");
    let expected = format!("{}:3000", h.pod_ip("alpha"));
    assert_eq!(bootstrap_target(&dep), Some(expected.as_str()));
    let spec = dep.spec.clone().expect("spec");
    assert_eq!(spec.replicas, Some(2));
    let fleet_template = Pod { spec: spec.template.spec.clone(), ..Default::default() };
    let bootstrap = h.store.pod(NS, "alpha").expect("bootstrap");
    assert_eq!(genesis_of(&fleet_template), genesis_of(&bootstrap));

    h.pass().await;
    assert_eq!(h.stage(), Stage::Ready);

    h.store.sim_sync_deployments();
    h.pass().await;
    let nodes = h.nodes();
    assert_eq!(nodes.len(), 3);
    assert_eq!(nodes[0], "alpha");

    h.store.sim_assign_addresses();
    h.store.take_journal();
    h.pass().await;
    assert!(h.store.take_journal().is_empty());
}

#[tokio::test]
async fn converged_cluster_issues_nothing() {
    let h = harness(4, 2, 2);
    h.settle().await;
    assert_eq!(h.stage(), Stage::Ready);
    assert_eq!(h.nodes().len(), 4);

    for _ in 0..3 {
        let outcome = h.pass().await;
        assert_eq!(outcome, Outcome::default());
    }
    assert!(h.store.journal().is_empty());
}

#[tokio::test]
async fn failed_bootstrap_is_replaced() {
    let h = harness(2, 1, 0);
    h.pass().await;
    h.pass().await;
    h.store.take_journal();

    h.store.sim_set_phase(NS, "alpha", "Failed");
    h.pass().await;
    let journal = h.store.take_journal();
    assert_eq!(actions(&journal)[0], (Verb::Delete, "Pod", "alpha"));
    assert_eq!(h.stage(), Stage::Genesis);
    assert!(h.nodes().is_empty());

    h.pass().await;
    assert_eq!(actions(&h.store.take_journal())[0], (Verb::Create, "Pod", "alpha"));
}

#[tokio::test]
async fn terminating_bootstrap_is_waited_out() {
    let h = harness(2, 1, 0);
    h.pass().await;
    h.pass().await;
    h.store.take_journal();

    h.store.sim_begin_termination(NS, "alpha");
    let outcome = h.pass().await;
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(1)));
    assert!(!actions(&h.store.take_journal()).iter().any(|(v, k, _)| *v == Verb::Create && *k == "Pod"));
}

#[tokio::test]
async fn lost_bootstrap_reverts_to_genesis_and_retargets_fleet() {
    let h = harness(3, 2, 0);
    h.settle().await;
    let old = format!("{}:3000", h.pod_ip("alpha"));

    h.store.sim_remove_pod(NS, "alpha");
    h.pass().await;
    assert_eq!(h.stage(), Stage::Genesis);

    let issued = h.settle().await;
    assert_eq!(h.stage(), Stage::Ready);
    assert!(actions(&issued).contains(&(Verb::Create, "Pod", "alpha")));
    assert!(actions(&issued).contains(&(Verb::Update, "Deployment", "alpha")));

    let dep = h.store.deployment(NS, "alpha").expect("fleet");
    let fresh = format!("{}:3000", h.pod_ip("alpha"));
    assert_ne!(old, fresh);
    assert_eq!(bootstrap_target(&dep), Some(fresh.as_str()));
    assert_eq!(dep.spec.and_then(|s| s.replicas), Some(2));
}

#[tokio::test]
async fn lost_fleet_reverts_to_bootstrap() {
    let h = harness(3, 2, 0);
    h.settle().await;

    h.store.sim_remove_deployment(NS, "alpha");
    h.pass().await;
    assert_eq!(h.stage(), Stage::Bootstrap);

    let issued = h.settle().await;
    assert!(actions(&issued).contains(&(Verb::Create, "Deployment", "alpha")));
    assert_eq!(h.stage(), Stage::Ready);
    assert_eq!(h.nodes().len(), 3);
}

#[tokio::test]
async fn resizing_updates_fleet_replicas() {
    let h = harness(3, 2, 0);
    h.settle().await;

    h.apply(5, 2, 0);
    h.pass().await;
    assert_eq!(actions(&h.store.take_journal()), vec![(Verb::Update, "Deployment", "alpha")]);
    assert_eq!(h.stage(), Stage::Ready);
    let dep = h.store.deployment(NS, "alpha").expect("fleet");
    assert_eq!(dep.spec.and_then(|s| s.replicas), Some(4));

    h.settle().await;
    assert_eq!(h.nodes().len(), 5);
    assert_eq!(h.nodes()[0], "alpha");
}

#[tokio::test]
async fn scaling_to_zero_tears_everything_down() {
    let h = harness(3, 2, 1);
    h.settle().await;
    assert_eq!(h.benchmarks(), vec!["alpha-benchmark-0"]);

    h.apply(0, 2, 1);
    h.settle().await;
    assert_eq!(h.stage(), Stage::Genesis);
    assert!(h.nodes().is_empty());
    assert!(h.store.pod_names(NS).is_empty());
    assert!(h.store.deployment(NS, "alpha").is_none());

    h.pass().await;
    assert!(h.store.take_journal().is_empty());
}

#[tokio::test]
async fn scaling_to_zero_during_genesis_removes_pending_bootstrap() {
    let h = harness(3, 2, 0);
    h.pass().await;
    h.pass().await;
    assert!(h.store.pod(NS, "alpha").is_some());
    h.store.take_journal();

    h.apply(0, 2, 0);
    h.pass().await;
    assert_eq!(
        actions(&h.store.take_journal()),
        vec![(Verb::Delete, "Pod", "alpha"), (Verb::UpdateStatus, "LedgerCluster", "alpha")]
    );
    assert_eq!(h.stage(), Stage::Genesis);
    assert!(h.nodes().is_empty());
    assert!(h.store.pod_names(NS).is_empty());
    assert!(h.store.deployment(NS, "alpha").is_none());
}

#[tokio::test]
async fn scaling_to_zero_during_bootstrap_removes_unobserved_fleet() {
    let h = harness(3, 2, 0);
    h.pass().await;
    h.pass().await;
    h.store.sim_assign_addresses();
    h.pass().await;
    assert_eq!(h.stage(), Stage::Bootstrap);
    h.pass().await;
    assert!(h.store.deployment(NS, "alpha").is_some());
    assert_eq!(h.stage(), Stage::Bootstrap);
    h.store.sim_sync_deployments();

    h.apply(0, 2, 0);
    h.pass().await;
    assert_eq!(h.stage(), Stage::Genesis);
    assert!(h.nodes().is_empty());
    assert!(h.store.pod_names(NS).is_empty());
    assert!(h.store.deployment(NS, "alpha").is_none());

    h.store.take_journal();
    h.pass().await;
    assert!(h.store.take_journal().is_empty());
}

#[tokio::test]
async fn first_pass_only_enters_genesis() {
    let h = harness(3, 2, 0);
    let stored = h.store.cluster(NS, "alpha").expect("cluster");
    let leftover = bootstrap_pod(&stored, &ControllerConfig::default(), "{}");
    h.store.create_pod(&leftover).await.expect("seed pod");
    h.store.take_journal();

    let outcome = h.pass().await;
    assert_eq!(outcome, Outcome::default());
    assert_eq!(actions(&h.store.take_journal()), vec![(Verb::UpdateStatus, "LedgerCluster", "alpha")]);
    assert_eq!(h.stage(), Stage::Genesis);
    assert!(h.nodes().is_empty());

    // the next pass adopts the existing bootstrap node instead of creating one
    h.pass().await;
    assert_eq!(actions(&h.store.take_journal()), vec![(Verb::UpdateStatus, "LedgerCluster", "alpha")]);
    assert_eq!(h.nodes(), vec!["alpha"]);
}

#[tokio::test]
async fn exited_low_index_benchmark_is_replaced() {
    let h = harness(3, 4, 2);
    h.settle().await;
    assert_eq!(h.benchmarks(), vec!["alpha-benchmark-0", "alpha-benchmark-1"]);

    h.store.sim_set_phase(NS, "alpha-benchmark-0", "Succeeded");
    let issued = h.settle().await;
    assert_eq!(
        actions(&issued),
        vec![(Verb::Delete, "Pod", "alpha-benchmark-0"), (Verb::Create, "Pod", "alpha-benchmark-0")]
    );
    assert_eq!(h.benchmarks(), vec!["alpha-benchmark-0", "alpha-benchmark-1"]);
    let phase = h.store.pod(NS, "alpha-benchmark-0").and_then(|p| p.status).and_then(|s| s.phase);
    assert_eq!(phase.as_deref(), Some("Running"));
    let nodes = h.nodes();
    assert_eq!(h.command("alpha-benchmark-0")[3], format!("{}:9000", h.pod_ip(&nodes[0])));
}

#[tokio::test]
async fn benchmarks_follow_indices_and_wallets() {
    let h = harness(3, 4, 2);
    h.settle().await;
    assert_eq!(h.benchmarks(), vec!["alpha-benchmark-0", "alpha-benchmark-1"]);

    let nodes = h.nodes();
    let cmd = h.command("alpha-benchmark-0");
    assert_eq!(cmd[..3], ["./benchmark", "remote", "--host"]);
    assert_eq!(cmd[3], format!("{}:9000", h.pod_ip(&nodes[0])));
    let wallet1 = std::fs::read_to_string(h.dir.path().join("config/wallet1.txt")).expect("wallet1");
    assert_eq!(cmd[5], wallet1);
    let cmd = h.command("alpha-benchmark-1");
    assert_eq!(cmd[3], format!("{}:9000", h.pod_ip(&nodes[1])));

    h.apply(3, 4, 1);
    let issued = h.settle().await;
    assert_eq!(actions(&issued), vec![(Verb::Delete, "Pod", "alpha-benchmark-1")]);
    assert_eq!(h.benchmarks(), vec!["alpha-benchmark-0"]);

    h.apply(3, 4, 3);
    let issued = h.settle().await;
    assert_eq!(
        actions(&issued),
        vec![(Verb::Create, "Pod", "alpha-benchmark-1"), (Verb::Create, "Pod", "alpha-benchmark-2")]
    );
    let cmd = h.command("alpha-benchmark-2");
    assert_eq!(cmd[3], format!("{}:9000", h.pod_ip(&nodes[2])));
}

#[tokio::test]
async fn benchmarks_without_a_wallet_use_random_keys() {
    let h = harness(2, 2, 2);
    h.settle().await;
    assert_ne!(h.command("alpha-benchmark-0")[5], "random");
    assert_eq!(h.command("alpha-benchmark-1")[5], "random");
}

#[tokio::test]
async fn more_benchmarks_than_nodes_is_left_alone() {
    let h = harness(2, 2, 3);
    h.settle().await;
    assert_eq!(h.stage(), Stage::Ready);
    assert!(h.benchmarks().is_empty());
}

#[tokio::test]
async fn missing_cluster_is_a_noop() {
    let h = harness(1, 0, 0);
    let outcome = h.rec.reconcile(&ClusterKey::new(NS, "ghost")).await.expect("pass");
    assert_eq!(outcome, Outcome::default());
    assert!(h.store.journal().is_empty());
}

#[tokio::test]
async fn store_failures_surface_to_the_caller() {
    let h = harness(2, 1, 0);
    h.store.set_unavailable(true);
    let err = h.rec.reconcile(&h.key).await.expect_err("down");
    assert!(matches!(err, Error::CollaboratorUnavailable(_)));

    h.store.set_unavailable(false);
    h.pass().await;
    assert_eq!(h.stage(), Stage::Genesis);
}
