//! `LedgerCluster` custom resource: the declared intent and the observed stage.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Desired shape of a ledger cluster.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "stratum.dev",
    version = "v1alpha1",
    kind = "LedgerCluster",
    plural = "ledgerclusters",
    shortname = "lc",
    namespaced,
    status = "LedgerClusterStatus",
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Stage", "type":"string", "jsonPath":".status.stage"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LedgerClusterSpec {
    /// Total number of ledger nodes, bootstrap node included.
    /// Negative values are treated as zero.
    pub size: i32,

    /// Number of funded wallets written into the genesis ledger.
    #[serde(default)]
    pub rich_wallets: u32,

    /// Number of benchmark pods driving load against the nodes.
    #[serde(default)]
    pub benchmark_pods: u32,
}

impl LedgerClusterSpec {
    pub fn desired_size(&self) -> u32 {
        self.size.max(0) as u32
    }

    /// Replica count of the fleet deployment (every node but the bootstrap one).
    pub fn fleet_replicas(&self) -> i32 {
        (self.size - 1).max(0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LedgerClusterStatus {
    #[serde(default)]
    pub stage: Stage,
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Lifecycle stage of a cluster.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub enum Stage {
    /// Never observed by the controller.
    #[default]
    Uninitialized,
    Genesis,
    Bootstrap,
    Ready,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Uninitialized => "Uninitialized",
            Stage::Genesis => "Genesis",
            Stage::Bootstrap => "Bootstrap",
            Stage::Ready => "Ready",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LedgerCluster {
    pub fn stage(&self) -> Stage {
        self.status.as_ref().map(|s| s.stage).unwrap_or_default()
    }

    pub fn node_names(&self) -> &[String] {
        self.status.as_ref().map(|s| s.nodes.as_slice()).unwrap_or(&[])
    }

    pub fn cluster_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn cluster_namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn key(&self) -> crate::ClusterKey {
        crate::ClusterKey::new(self.cluster_namespace(), self.cluster_name())
    }
}
