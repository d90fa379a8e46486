//! Canonical view of a pod managed for a cluster.

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

use crate::{CLASS_BOOTSTRAP, LABEL_CLASS, LABEL_INDEX, LABEL_ROLE, ROLE_BENCHMARK, ROLE_NODE};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    Bootstrap,
    Node,
    Benchmark,
}

impl Role {
    /// Value of the `role` label selecting pods of this role.
    /// The bootstrap node is listed together with the fleet.
    pub fn label(&self) -> &'static str {
        match self {
            Role::Bootstrap | Role::Node => ROLE_NODE,
            Role::Benchmark => ROLE_BENCHMARK,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Running,
    Other,
}

impl Phase {
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Phase::Pending,
            Some("Running") => Phase::Running,
            _ => Phase::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagedPod {
    pub name: String,
    pub role: Role,
    /// Ordering key taken from the `stratum.dev/index` label. Bootstrap is 0;
    /// deployment-spawned fleet pods have none.
    pub index: Option<u32>,
    pub ip: Option<String>,
    pub phase: Phase,
    /// Set once the platform accepted a delete for this pod.
    pub terminating: bool,
}

impl ManagedPod {
    pub fn from_pod(pod: &Pod) -> Self {
        let labels = pod.metadata.labels.as_ref();
        let label = |key: &str| labels.and_then(|l| l.get(key)).map(String::as_str);
        let role = match (label(LABEL_ROLE), label(LABEL_CLASS)) {
            (Some(ROLE_BENCHMARK), _) => Role::Benchmark,
            (_, Some(CLASS_BOOTSTRAP)) => Role::Bootstrap,
            _ => Role::Node,
        };
        let index = match role {
            Role::Bootstrap => Some(0),
            _ => label(LABEL_INDEX).and_then(parse_index),
        };
        let status = pod.status.as_ref();
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            role,
            index,
            ip: status.and_then(|s| s.pod_ip.clone()).filter(|ip| !ip.is_empty()),
            phase: Phase::parse(status.and_then(|s| s.phase.as_deref())),
            terminating: pod.metadata.deletion_timestamp.is_some(),
        }
    }

    /// Pending or running and not marked for deletion.
    pub fn is_live(&self) -> bool {
        !self.terminating && matches!(self.phase, Phase::Pending | Phase::Running)
    }
}

/// Only plain decimal digits are accepted; signs, whitespace and overflow are rejected.
fn parse_index(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn pod(labels: &[(&str, &str)], phase: &str, ip: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("alpha-benchmark-2".into()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            status: Some(PodStatus { phase: Some(phase.into()), pod_ip: ip.map(Into::into), ..Default::default() }),
            ..Default::default()
        }
    }

    #[test]
    fn reads_role_index_and_address() {
        let p = ManagedPod::from_pod(&pod(&[("role", "benchmark"), (LABEL_INDEX, "2")], "Running", Some("10.0.0.7")));
        assert_eq!(p.role, Role::Benchmark);
        assert_eq!(p.index, Some(2));
        assert_eq!(p.ip.as_deref(), Some("10.0.0.7"));
        assert!(p.is_live());
    }

    #[test]
    fn bootstrap_is_index_zero() {
        let p = ManagedPod::from_pod(&pod(&[("role", "node"), ("class", "bootstrap")], "Pending", Some("")));
        assert_eq!(p.role, Role::Bootstrap);
        assert_eq!(p.index, Some(0));
        assert_eq!(p.ip, None);
    }

    #[test]
    fn malformed_index_labels_are_rejected() {
        for raw in ["", "-1", "+3", " 4", "4a", "99999999999"] {
            let p = ManagedPod::from_pod(&pod(&[("role", "benchmark"), (LABEL_INDEX, raw)], "Running", None));
            assert_eq!(p.index, None, "accepted {:?}", raw);
        }
    }

    #[test]
    fn terminating_or_finished_pods_are_not_live() {
        let mut p = pod(&[("role", "node")], "Running", None);
        p.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        assert!(!ManagedPod::from_pod(&p).is_live());
        assert!(!ManagedPod::from_pod(&pod(&[("role", "node")], "Succeeded", None)).is_live());
        assert!(!ManagedPod::from_pod(&pod(&[("role", "node")], "Failed", None)).is_live());
    }
}
