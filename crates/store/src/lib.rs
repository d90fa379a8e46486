//! Stratum in-RAM resource store.
//!
//! `MemStore` implements [`ResourceStore`] over plain maps and journals every
//! mutation the controller issues. The `sim_*` helpers stand in for the
//! platform (address assignment, the deployment's pod controller, owner
//! garbage collection, out-of-band edits) and are never journaled.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use k8s_openapi::api::{apps::v1::Deployment, core::v1::{Pod, PodStatus}};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use k8s_openapi::chrono::Utc;
use serde::{Deserialize, Serialize};
use stratum_core::{selector_matches, Error, LedgerCluster, ResourceStore, Result};
use tracing::debug;

type Key = (String, String);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Verb {
    Create,
    Update,
    Delete,
    UpdateStatus,
}

/// One mutation issued through the [`ResourceStore`] interface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Action {
    pub verb: Verb,
    pub kind: String,
    pub name: String,
}

#[derive(Default)]
struct World {
    clusters: BTreeMap<Key, LedgerCluster>,
    pods: BTreeMap<Key, Pod>,
    deployments: BTreeMap<Key, Deployment>,
    journal: Vec<Action>,
    next_ip: u32,
    next_rv: u64,
    next_pod: u64,
    unavailable: bool,
}

impl World {
    fn check(&self) -> Result<()> {
        if self.unavailable {
            return Err(Error::unavailable("memstore marked unavailable"));
        }
        Ok(())
    }

    fn record(&mut self, verb: Verb, kind: &str, name: &str) {
        self.journal.push(Action { verb, kind: kind.to_string(), name: name.to_string() });
    }

    fn stamp(&mut self, meta: &mut ObjectMeta) {
        self.next_rv += 1;
        meta.resource_version = Some(self.next_rv.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
            meta.creation_timestamp = Some(Time(Utc::now()));
        }
    }

    fn next_address(&mut self) -> String {
        self.next_ip += 1;
        format!("10.0.{}.{}", self.next_ip / 250, self.next_ip % 250 + 2)
    }

    /// Owner-reference garbage collection for everything hanging off `uid`.
    fn collect_owned_by(&mut self, uid: &str) {
        let owned = |meta: &ObjectMeta| {
            meta.owner_references.as_ref().map(|refs| refs.iter().any(|r| r.uid == uid)).unwrap_or(false)
        };
        let dead_deps: Vec<String> = self
            .deployments
            .values()
            .filter(|d| owned(&d.metadata))
            .filter_map(|d| d.metadata.uid.clone())
            .collect();
        self.deployments.retain(|_, d| !owned(&d.metadata));
        self.pods.retain(|_, p| !owned(&p.metadata));
        for dep_uid in dead_deps {
            self.collect_owned_by(&dep_uid);
        }
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key(meta: &ObjectMeta) -> Key {
    key(meta.namespace.as_deref().unwrap_or("default"), meta.name.as_deref().unwrap_or_default())
}

#[derive(Default)]
pub struct MemStore {
    world: Mutex<World>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, World> {
        // A panicking test thread must not hide the store from the assertions that follow.
        self.world.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mutations issued so far, oldest first.
    pub fn journal(&self) -> Vec<Action> {
        self.lock().journal.clone()
    }

    /// Return and forget the journal.
    pub fn take_journal(&self) -> Vec<Action> {
        std::mem::take(&mut self.lock().journal)
    }

    /// Make every store call fail with `CollaboratorUnavailable`.
    pub fn set_unavailable(&self, down: bool) {
        self.lock().unavailable = down;
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock().pods.get(&key(namespace, name)).cloned()
    }

    pub fn pod_names(&self, namespace: &str) -> Vec<String> {
        self.lock().pods.keys().filter(|(ns, _)| ns == namespace).map(|(_, n)| n.clone()).collect()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.lock().deployments.get(&key(namespace, name)).cloned()
    }

    pub fn cluster(&self, namespace: &str, name: &str) -> Option<LedgerCluster> {
        self.lock().clusters.get(&key(namespace, name)).cloned()
    }

    /// Admit a cluster resource as the API server would on `kubectl apply`.
    pub fn sim_apply_cluster(&self, mut cluster: LedgerCluster) -> LedgerCluster {
        let mut w = self.lock();
        if cluster.metadata.namespace.is_none() {
            cluster.metadata.namespace = Some("default".into());
        }
        let k = meta_key(&cluster.metadata);
        if let Some(existing) = w.clusters.get(&k) {
            cluster.metadata.uid = existing.metadata.uid.clone();
            cluster.metadata.creation_timestamp = existing.metadata.creation_timestamp.clone();
            cluster.status = existing.status.clone();
        }
        w.stamp(&mut cluster.metadata);
        w.clusters.insert(k, cluster.clone());
        cluster
    }

    /// Delete a cluster resource and everything it owns.
    pub fn sim_delete_cluster(&self, namespace: &str, name: &str) {
        let mut w = self.lock();
        if let Some(c) = w.clusters.remove(&key(namespace, name)) {
            if let Some(uid) = c.metadata.uid {
                w.collect_owned_by(&uid);
            }
        }
    }

    /// Assign an address to every pending pod and mark it running.
    pub fn sim_assign_addresses(&self) {
        let mut w = self.lock();
        let pending: Vec<Key> = w
            .pods
            .iter()
            .filter(|(_, p)| p.status.as_ref().and_then(|s| s.pod_ip.as_ref()).is_none())
            .map(|(k, _)| k.clone())
            .collect();
        for k in pending {
            let ip = w.next_address();
            if let Some(pod) = w.pods.get_mut(&k) {
                pod.status = Some(PodStatus { phase: Some("Running".into()), pod_ip: Some(ip), ..Default::default() });
            }
        }
    }

    pub fn sim_set_phase(&self, namespace: &str, name: &str, phase: &str) {
        if let Some(pod) = self.lock().pods.get_mut(&key(namespace, name)) {
            pod.status.get_or_insert_with(Default::default).phase = Some(phase.to_string());
        }
    }

    /// Mark a pod as terminating without removing it.
    pub fn sim_begin_termination(&self, namespace: &str, name: &str) {
        if let Some(pod) = self.lock().pods.get_mut(&key(namespace, name)) {
            pod.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
    }

    /// Out-of-band pod removal (e.g. `kubectl delete pod`).
    pub fn sim_remove_pod(&self, namespace: &str, name: &str) {
        self.lock().pods.remove(&key(namespace, name));
    }

    /// Out-of-band deployment removal, cascading to its pods.
    pub fn sim_remove_deployment(&self, namespace: &str, name: &str) {
        let mut w = self.lock();
        if let Some(dep) = w.deployments.remove(&key(namespace, name)) {
            if let Some(uid) = dep.metadata.uid {
                w.collect_owned_by(&uid);
            }
        }
    }

    /// Act as the deployment's pod controller: converge each deployment's
    /// owned pod count to `spec.replicas`, removing the newest pods first.
    pub fn sim_sync_deployments(&self) {
        let mut w = self.lock();
        let deps: Vec<Deployment> = w.deployments.values().cloned().collect();
        for dep in deps {
            let (Some(dep_uid), Some(dep_name)) = (dep.metadata.uid.clone(), dep.metadata.name.clone()) else { continue };
            let ns = dep.metadata.namespace.clone().unwrap_or_else(|| "default".into());
            let want = dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1).max(0) as usize;
            let mut owned: Vec<(u64, Key)> = w
                .pods
                .iter()
                .filter(|(_, p)| {
                    p.metadata.deletion_timestamp.is_none()
                        && p.metadata.owner_references.as_ref().map(|r| r.iter().any(|o| o.uid == dep_uid)).unwrap_or(false)
                })
                .map(|(k, p)| {
                    let seq = p.metadata.annotations.as_ref().and_then(|a| a.get("sim/seq")).and_then(|s| s.parse().ok()).unwrap_or(0);
                    (seq, k.clone())
                })
                .collect();
            owned.sort();
            while owned.len() > want {
                if let Some((_, k)) = owned.pop() {
                    w.pods.remove(&k);
                }
            }
            let template = dep.spec.as_ref().map(|s| s.template.clone()).unwrap_or_default();
            while owned.len() < want {
                w.next_pod += 1;
                let seq = w.next_pod;
                let name = format!("{}-{:05x}", dep_name, seq);
                let mut meta = template.metadata.clone().unwrap_or_default();
                meta.name = Some(name.clone());
                meta.namespace = Some(ns.clone());
                meta.annotations.get_or_insert_with(Default::default).insert("sim/seq".into(), seq.to_string());
                meta.owner_references = Some(vec![OwnerReference {
                    api_version: "apps/v1".into(),
                    kind: "Deployment".into(),
                    name: dep_name.clone(),
                    uid: dep_uid.clone(),
                    controller: Some(true),
                    ..Default::default()
                }]);
                w.stamp(&mut meta);
                let pod = Pod {
                    metadata: meta,
                    spec: template.spec.clone(),
                    status: Some(PodStatus { phase: Some("Pending".into()), ..Default::default() }),
                };
                let k = key(&ns, &name);
                w.pods.insert(k.clone(), pod);
                owned.push((seq, k));
            }
        }
    }
}

#[async_trait::async_trait]
impl ResourceStore for MemStore {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<LedgerCluster>> {
        let w = self.lock();
        w.check()?;
        Ok(w.clusters.get(&key(namespace, name)).cloned())
    }

    async fn update_cluster_status(&self, cluster: &LedgerCluster) -> Result<LedgerCluster> {
        let mut w = self.lock();
        w.check()?;
        let k = meta_key(&cluster.metadata);
        let mut stored = w.clusters.get(&k).cloned().ok_or_else(|| Error::not_found("LedgerCluster", &k.1))?;
        stored.status = cluster.status.clone();
        w.stamp(&mut stored.metadata);
        w.clusters.insert(k.clone(), stored.clone());
        w.record(Verb::UpdateStatus, "LedgerCluster", &k.1);
        Ok(stored)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let w = self.lock();
        w.check()?;
        Ok(w.pods.get(&key(namespace, name)).cloned())
    }

    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        let w = self.lock();
        w.check()?;
        Ok(w
            .pods
            .iter()
            .filter(|((ns, _), p)| ns == namespace && selector_matches(selector, p.metadata.labels.as_ref()))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut w = self.lock();
        w.check()?;
        let k = meta_key(&pod.metadata);
        if w.pods.contains_key(&k) {
            return Err(Error::already_exists("Pod", &k.1));
        }
        let mut pod = pod.clone();
        pod.metadata.namespace = Some(k.0.clone());
        w.stamp(&mut pod.metadata);
        pod.status = Some(PodStatus { phase: Some("Pending".into()), ..Default::default() });
        w.pods.insert(k.clone(), pod.clone());
        w.record(Verb::Create, "Pod", &k.1);
        debug!(pod = %k.1, "memstore created pod");
        Ok(pod)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut w = self.lock();
        w.check()?;
        let removed = w.pods.remove(&key(namespace, name)).ok_or_else(|| Error::not_found("Pod", name))?;
        if let Some(uid) = removed.metadata.uid {
            w.collect_owned_by(&uid);
        }
        w.record(Verb::Delete, "Pod", name);
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let w = self.lock();
        w.check()?;
        Ok(w.deployments.get(&key(namespace, name)).cloned())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let mut w = self.lock();
        w.check()?;
        let k = meta_key(&deployment.metadata);
        if w.deployments.contains_key(&k) {
            return Err(Error::already_exists("Deployment", &k.1));
        }
        let mut dep = deployment.clone();
        dep.metadata.namespace = Some(k.0.clone());
        w.stamp(&mut dep.metadata);
        w.deployments.insert(k.clone(), dep.clone());
        w.record(Verb::Create, "Deployment", &k.1);
        Ok(dep)
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let mut w = self.lock();
        w.check()?;
        let k = meta_key(&deployment.metadata);
        let existing = w.deployments.get(&k).ok_or_else(|| Error::not_found("Deployment", &k.1))?;
        let mut dep = deployment.clone();
        dep.metadata.uid = existing.metadata.uid.clone();
        dep.metadata.creation_timestamp = existing.metadata.creation_timestamp.clone();
        dep.metadata.namespace = Some(k.0.clone());
        w.stamp(&mut dep.metadata);
        w.deployments.insert(k.clone(), dep.clone());
        w.record(Verb::Update, "Deployment", &k.1);
        Ok(dep)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let mut w = self.lock();
        w.check()?;
        let removed = w.deployments.remove(&key(namespace, name)).ok_or_else(|| Error::not_found("Deployment", name))?;
        if let Some(uid) = removed.metadata.uid {
            w.collect_owned_by(&uid);
        }
        w.record(Verb::Delete, "Deployment", name);
        Ok(())
    }
}
