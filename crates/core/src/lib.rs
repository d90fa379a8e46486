//! Stratum core types: the cluster resource, managed pod view, errors and
//! the resource store seam shared by the controller and its backends.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

pub mod crd;
pub mod error;
pub mod pod;
pub mod store;

pub use crd::{LedgerCluster, LedgerClusterSpec, LedgerClusterStatus, Stage};
pub use error::{Error, Result};
pub use pod::{ManagedPod, Phase, Role};
pub use store::ResourceStore;

pub mod prelude {
    pub use super::{
        ClusterKey, Error, LedgerCluster, LedgerClusterSpec, LedgerClusterStatus, ManagedPod, Phase,
        ResourceStore, Result, Role, Stage,
    };
}

/// Label carrying the owning cluster name.
pub const LABEL_APP: &str = "app";
/// Label carrying the pod role (`node` or `benchmark`).
pub const LABEL_ROLE: &str = "role";
/// Label distinguishing the bootstrap node from fleet nodes.
pub const LABEL_CLASS: &str = "class";
/// Structured ordering index of core-managed pods.
pub const LABEL_INDEX: &str = "stratum.dev/index";
/// Annotation recording which bootstrap address a fleet deployment targets.
pub const ANNOTATION_BOOTSTRAP: &str = "stratum.dev/bootstrap";

pub const ROLE_NODE: &str = "node";
pub const ROLE_BENCHMARK: &str = "benchmark";
pub const CLASS_BOOTSTRAP: &str = "bootstrap";
pub const CLASS_FLEET: &str = "fleet";

/// Namespaced identity of a cluster resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Label selector (exact match) for every object of `cluster` with the given role.
pub fn labels_for(cluster: &str, role: &str) -> BTreeMap<String, String> {
    let mut set = BTreeMap::new();
    set.insert(LABEL_APP.to_string(), cluster.to_string());
    set.insert(LABEL_ROLE.to_string(), role.to_string());
    set
}

/// Same as [`labels_for`] plus a `class` discriminator.
pub fn labels_with_class(cluster: &str, role: &str, class: &str) -> BTreeMap<String, String> {
    let mut set = labels_for(cluster, role);
    set.insert(LABEL_CLASS.to_string(), class.to_string());
    set
}

/// Render an exact-match selector in the `k=v,k2=v2` form the API server accepts.
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}

/// True if every selector pair is present in `labels`.
pub fn selector_matches(selector: &BTreeMap<String, String>, labels: Option<&BTreeMap<String, String>>) -> bool {
    match labels {
        Some(labels) => selector.iter().all(|(k, v)| labels.get(k) == Some(v)),
        None => selector.is_empty(),
    }
}

pub fn benchmark_pod_name(cluster: &str, index: u32) -> String {
    format!("{}-benchmark-{}", cluster, index)
}
