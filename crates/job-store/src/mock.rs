//! In-memory ObjectStore for unit testing
//!
//! Stores SetupJobs, Pods and Nodes in memory, assigns resource versions and
//! UIDs like the API server does, and can be told to fail specific calls.

use crate::error::StoreError;
use crate::store_trait::ObjectStore;
use chrono::Utc;
use crds::SetupJob;
use k8s_openapi::api::core::v1::{Node, Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::{Selector, SelectorExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Key = (String, String);

#[derive(Debug, Default)]
struct State {
    jobs: BTreeMap<Key, SetupJob>,
    pods: BTreeMap<Key, Pod>,
    nodes: BTreeMap<String, Node>,
    next_version: u64,
    // Failure injection
    conflict_next_status_write: bool,
    fail_list_pods: bool,
    fail_pod_creates_on: HashSet<String>,
    // Call accounting
    status_writes: usize,
    pod_creates: usize,
    deletes: Vec<Key>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// In-memory object store for tests
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a SetupJob, assigning a UID and resource version when missing (for test setup)
    pub fn add_job(&self, mut job: SetupJob) -> SetupJob {
        let mut state = self.lock();
        let version = state.bump();
        let namespace = job.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let name = job.metadata.name.clone().unwrap_or_default();
        job.metadata.namespace = Some(namespace.clone());
        job.metadata.resource_version = Some(version);
        if job.metadata.uid.is_none() {
            job.metadata.uid = Some(format!("job-uid-{namespace}-{name}"));
        }
        state.jobs.insert(key(&namespace, &name), job.clone());
        job
    }

    /// Current copy of a SetupJob
    #[must_use]
    pub fn job(&self, namespace: &str, name: &str) -> Option<SetupJob> {
        self.lock().jobs.get(&key(namespace, name)).cloned()
    }

    /// Add a node (for test setup)
    pub fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.lock().nodes.insert(name, node);
    }

    /// Remove a node, simulating node churn
    pub fn remove_node(&self, name: &str) {
        self.lock().nodes.remove(name);
    }

    /// Add a pod as-is (for test setup)
    pub fn add_pod(&self, mut pod: Pod) {
        let mut state = self.lock();
        let version = state.bump();
        pod.metadata.resource_version = Some(version);
        let namespace = pod.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let name = pod.metadata.name.clone().unwrap_or_default();
        state.pods.insert(key(&namespace, &name), pod);
    }

    /// All pods currently stored
    #[must_use]
    pub fn pods(&self) -> Vec<Pod> {
        self.lock().pods.values().cloned().collect()
    }

    /// Set the phase of a pod, as the kubelet would
    pub fn set_pod_phase(&self, namespace: &str, name: &str, phase: &str) {
        let mut state = self.lock();
        let version = state.bump();
        if let Some(pod) = state.pods.get_mut(&key(namespace, name)) {
            pod.metadata.resource_version = Some(version);
            pod.status.get_or_insert_with(PodStatus::default).phase = Some(phase.to_string());
        }
    }

    /// Set the phase of every pod scheduled to `node`
    pub fn set_phase_on_node(&self, node: &str, phase: &str) {
        let targets: Vec<Key> = self
            .lock()
            .pods
            .iter()
            .filter(|(_, pod)| pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node))
            .map(|(k, _)| k.clone())
            .collect();
        for (namespace, name) in targets {
            self.set_pod_phase(&namespace, &name, phase);
        }
    }

    /// Modify a stored job, bumping its resource version (simulates a concurrent writer)
    pub fn touch_job(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        let version = state.bump();
        if let Some(job) = state.jobs.get_mut(&key(namespace, name)) {
            job.metadata.resource_version = Some(version);
        }
    }

    /// Mark a job as being deleted
    pub fn mark_job_deleting(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        if let Some(job) = state.jobs.get_mut(&key(namespace, name)) {
            job.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
    }

    /// Make the next status write fail with a conflict
    pub fn conflict_next_status_write(&self) {
        self.lock().conflict_next_status_write = true;
    }

    /// Make pod listing fail with a transient error
    pub fn fail_list_pods(&self, fail: bool) {
        self.lock().fail_list_pods = fail;
    }

    /// Make pod creation on `node` fail
    pub fn fail_pod_creates_on(&self, node: &str) {
        self.lock().fail_pod_creates_on.insert(node.to_string());
    }

    /// Stop failing pod creation on `node`
    pub fn allow_pod_creates_on(&self, node: &str) {
        self.lock().fail_pod_creates_on.remove(node);
    }

    /// Number of successful status writes
    #[must_use]
    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    /// Number of successful pod creations
    #[must_use]
    pub fn pod_creates(&self) -> usize {
        self.lock().pod_creates
    }

    /// Jobs deleted so far, as (namespace, name)
    #[must_use]
    pub fn deleted_jobs(&self) -> Vec<(String, String)> {
        self.lock().deletes.clone()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<SetupJob, StoreError> {
        self.job(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("SetupJob {namespace}/{name}")))
    }

    async fn list_jobs(&self) -> Result<Vec<SetupJob>, StoreError> {
        Ok(self.lock().jobs.values().cloned().collect())
    }

    async fn replace_job_status(&self, job: &SetupJob) -> Result<SetupJob, StoreError> {
        let namespace = job.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let name = job.metadata.name.clone().unwrap_or_default();
        let mut state = self.lock();

        if state.conflict_next_status_write {
            state.conflict_next_status_write = false;
            return Err(StoreError::Conflict(format!("SetupJob {namespace}/{name}: injected conflict")));
        }

        let version = state.bump();
        let stored = state
            .jobs
            .get_mut(&key(&namespace, &name))
            .ok_or_else(|| StoreError::NotFound(format!("SetupJob {namespace}/{name}")))?;
        if stored.metadata.resource_version != job.metadata.resource_version {
            return Err(StoreError::Conflict(format!(
                "SetupJob {namespace}/{name}: stored version {:?}, write based on {:?}",
                stored.metadata.resource_version, job.metadata.resource_version
            )));
        }
        stored.status = job.status.clone();
        stored.metadata.resource_version = Some(version);
        let updated = stored.clone();
        state.status_writes += 1;
        Ok(updated)
    }

    async fn delete_job(&self, namespace: &str, name: &str, uid: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let k = key(namespace, name);
        let stored_uid = state
            .jobs
            .get(&k)
            .ok_or_else(|| StoreError::NotFound(format!("SetupJob {namespace}/{name}")))?
            .metadata
            .uid
            .clone();
        if stored_uid.as_deref() != Some(uid) {
            return Err(StoreError::Conflict(format!(
                "SetupJob {namespace}/{name}: uid precondition failed"
            )));
        }
        state.jobs.remove(&k);
        state.pods.retain(|_, pod| {
            !pod.metadata
                .owner_references
                .iter()
                .flatten()
                .any(|owner| owner.uid == uid)
        });
        state.deletes.push(k);
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        self.lock()
            .pods
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("pod {namespace}/{name}")))
    }

    async fn list_pods(&self, namespace: &str, selector: &Selector) -> Result<Vec<Pod>, StoreError> {
        let state = self.lock();
        if state.fail_list_pods {
            return Err(StoreError::Unavailable("injected list failure".to_string()));
        }
        let empty = BTreeMap::new();
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, pod)| selector.matches(pod.metadata.labels.as_ref().unwrap_or(&empty)))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError> {
        let mut state = self.lock();
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| StoreError::InvalidRequest("pod missing name".to_string()))?;
        let node = pod.spec.as_ref().and_then(|s| s.node_name.clone()).unwrap_or_default();
        if state.fail_pod_creates_on.contains(&node) {
            return Err(StoreError::Unavailable(format!("injected create failure on node {node}")));
        }
        let k = key(namespace, &name);
        if state.pods.contains_key(&k) {
            return Err(StoreError::AlreadyExists(format!("pod {namespace}/{name}")));
        }
        let version = state.bump();
        let mut created = pod.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.resource_version = Some(version);
        created.metadata.uid = Some(format!("pod-uid-{namespace}-{name}"));
        state.pods.insert(k, created.clone());
        state.pod_creates += 1;
        Ok(created)
    }

    async fn list_nodes(&self, node_selector: &Selector) -> Result<Vec<Node>, StoreError> {
        let empty = BTreeMap::new();
        Ok(self
            .lock()
            .nodes
            .values()
            .filter(|node| node_selector.matches(node.metadata.labels.as_ref().unwrap_or(&empty)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::SetupJobSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, ObjectMeta};

    fn job(name: &str) -> SetupJob {
        let mut job = SetupJob::new(name, SetupJobSpec::default());
        job.metadata.namespace = Some("default".to_string());
        job
    }

    #[tokio::test]
    async fn test_status_write_requires_current_version() {
        let store = MemoryStore::new();
        let stored = store.add_job(job("setup"));

        let mut first = stored.clone();
        first.status = Some(crds::SetupJobStatus { active: 1, ..Default::default() });
        store.replace_job_status(&first).await.unwrap();

        // Second write based on the old version must be rejected
        let mut stale = stored;
        stale.status = Some(crds::SetupJobStatus { active: 2, ..Default::default() });
        let result = store.replace_job_status(&stale).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.job("default", "setup").unwrap().status.unwrap().active, 1);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_owned_pods() {
        let store = MemoryStore::new();
        let stored = store.add_job(job("setup"));
        let uid = stored.metadata.uid.clone().unwrap();

        store.add_pod(Pod {
            metadata: ObjectMeta {
                name: Some("setup-node-a".to_string()),
                namespace: Some("default".to_string()),
                owner_references: Some(vec![k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                    uid: uid.clone(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        });

        store.delete_job("default", "setup", &uid).await.unwrap();
        assert!(store.job("default", "setup").is_none());
        assert!(store.pods().is_empty());

        let again = store.delete_job("default", "setup", &uid).await;
        assert!(matches!(again, Err(StoreError::NotFound(_))));
    }

    fn labelled_pod(name: &str, labels: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_list_pods_applies_label_selector() {
        let store = MemoryStore::new();
        store.add_pod(labelled_pod("a", &[("app", "setup"), ("tier", "x")]));
        store.add_pod(labelled_pod("b", &[("app", "setup"), ("tier", "y")]));
        store.add_pod(labelled_pod("c", &[("app", "other")]));

        let selector = Selector::try_from(LabelSelector {
            match_labels: Some(BTreeMap::from([("app".to_string(), "setup".to_string())])),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "NotIn".to_string(),
                values: Some(vec!["y".to_string()]),
            }]),
        })
        .unwrap();
        let pods = store.list_pods("default", &selector).await.unwrap();
        let names: Vec<_> = pods.iter().filter_map(|p| p.metadata.name.as_deref()).collect();
        assert_eq!(names, vec!["a"]);

        assert_eq!(store.list_pods("default", &Selector::default()).await.unwrap().len(), 3);
        assert!(store.list_pods("other", &Selector::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_pod() {
        let store = MemoryStore::new();
        store.add_pod(labelled_pod("a", &[]));
        assert!(store.get_pod("default", "a").await.is_ok());
        assert!(matches!(store.get_pod("default", "b").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_checks_uid_precondition() {
        let store = MemoryStore::new();
        store.add_job(job("setup"));
        let result = store.delete_job("default", "setup", "some-other-uid").await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(store.job("default", "setup").is_some());
    }
}
