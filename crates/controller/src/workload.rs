//! Pod and deployment templates for the managed ledger workload.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, LocalObjectReference, ObjectFieldSelector, Pod, PodSpec,
    PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::Resource;
use stratum_core::{
    benchmark_pod_name, labels_for, labels_with_class, LedgerCluster, ANNOTATION_BOOTSTRAP, CLASS_BOOTSTRAP,
    CLASS_FLEET, LABEL_INDEX, ROLE_BENCHMARK, ROLE_NODE,
};

use crate::config::ControllerConfig;

pub const CONTAINER: &str = "node";
pub const ENV_GENESIS: &str = "LEDGER_GENESIS";
pub const ENV_WALLET: &str = "LEDGER_WALLET";
pub const ENV_NODE_HOST: &str = "LEDGER_NODE_HOST";
/// Wallet argument asking a node to generate a throwaway key.
pub const RANDOM_WALLET: &str = "random";

/// `host:port`, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: i32) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn meta(cluster: &LedgerCluster, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(cluster.cluster_namespace().to_string()),
        labels: Some(labels),
        owner_references: cluster.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

fn pull_secrets(cfg: &ControllerConfig) -> Option<Vec<LocalObjectReference>> {
    cfg.image_pull_secret.as_ref().map(|name| vec![LocalObjectReference { name: Some(name.clone()) }])
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.to_string()), ..Default::default() }
}

fn node_pod_spec(cfg: &ControllerConfig, genesis: &str, wallet: &str, bootstrap: Option<&str>) -> PodSpec {
    let mut command = vec!["./node".to_string(), "--api.port".to_string(), cfg.api_port.to_string()];
    command.extend(bootstrap.map(str::to_string));

    let mut vars = vec![
        EnvVar {
            name: ENV_NODE_HOST.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector { field_path: "status.podIP".to_string(), ..Default::default() }),
                ..Default::default()
            }),
            ..Default::default()
        },
        env(ENV_GENESIS, genesis),
        env(ENV_WALLET, wallet),
    ];
    vars.extend(cfg.node_env.iter().map(|(k, v)| env(k, v)));

    PodSpec {
        containers: vec![Container {
            name: CONTAINER.to_string(),
            image: Some(cfg.image.clone()),
            stdin: Some(true),
            command: Some(command),
            env: Some(vars),
            ports: Some(vec![
                ContainerPort { container_port: cfg.node_port, name: Some("node".into()), ..Default::default() },
                ContainerPort { container_port: cfg.api_port, name: Some("http".into()), ..Default::default() },
            ]),
            ..Default::default()
        }],
        image_pull_secrets: pull_secrets(cfg),
        ..Default::default()
    }
}

/// The single node every other node bootstraps against. Named after the cluster.
pub fn bootstrap_pod(cluster: &LedgerCluster, cfg: &ControllerConfig, genesis: &str) -> Pod {
    let mut labels = labels_with_class(cluster.cluster_name(), ROLE_NODE, CLASS_BOOTSTRAP);
    labels.insert(LABEL_INDEX.to_string(), "0".to_string());
    Pod {
        metadata: meta(cluster, cluster.cluster_name().to_string(), labels),
        spec: Some(node_pod_spec(cfg, genesis, &cfg.bootstrap_wallet, None)),
        ..Default::default()
    }
}

/// Fleet of non-bootstrap nodes, all pointed at `bootstrap_addr`.
pub fn fleet_deployment(cluster: &LedgerCluster, cfg: &ControllerConfig, genesis: &str, bootstrap_addr: &str) -> Deployment {
    let labels = labels_with_class(cluster.cluster_name(), ROLE_NODE, CLASS_FLEET);
    let mut metadata = meta(cluster, cluster.cluster_name().to_string(), labels.clone());
    metadata.annotations = Some(BTreeMap::from([(ANNOTATION_BOOTSTRAP.to_string(), bootstrap_addr.to_string())]));
    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(cluster.spec.fleet_replicas()),
            selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                spec: Some(node_pod_spec(cfg, genesis, RANDOM_WALLET, Some(bootstrap_addr))),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Load generator `index` driving the node reachable at `host`.
pub fn benchmark_pod(cluster: &LedgerCluster, cfg: &ControllerConfig, index: u32, host: &str, wallet: &str) -> Pod {
    let mut labels = labels_for(cluster.cluster_name(), ROLE_BENCHMARK);
    labels.insert(LABEL_INDEX.to_string(), index.to_string());
    let command = ["./benchmark", "remote", "--host", host, "--wallet", wallet].map(str::to_string).to_vec();
    Pod {
        metadata: meta(cluster, benchmark_pod_name(cluster.cluster_name(), index), labels),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "benchmark".to_string(),
                image: Some(cfg.image.clone()),
                stdin: Some(true),
                command: Some(command),
                ..Default::default()
            }],
            image_pull_secrets: pull_secrets(cfg),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Genesis document embedded in a node pod, if any.
pub fn genesis_of(pod: &Pod) -> Option<String> {
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == CONTAINER)?
        .env
        .as_ref()?
        .iter()
        .find(|e| e.name == ENV_GENESIS)
        .and_then(|e| e.value.clone())
}

/// Bootstrap address a fleet deployment was rendered with.
pub fn bootstrap_target(deployment: &Deployment) -> Option<&str> {
    deployment.metadata.annotations.as_ref()?.get(ANNOTATION_BOOTSTRAP).map(String::as_str)
}

/// Re-render the fleet template against a new bootstrap address, keeping replicas.
pub fn retarget(deployment: &mut Deployment, fresh: Deployment) {
    let replicas = deployment.spec.as_ref().and_then(|s| s.replicas);
    deployment.metadata.annotations = fresh.metadata.annotations;
    deployment.metadata.labels = fresh.metadata.labels;
    deployment.spec = fresh.spec;
    if let Some(spec) = deployment.spec.as_mut() {
        spec.replicas = replicas.or(spec.replicas);
    }
}
