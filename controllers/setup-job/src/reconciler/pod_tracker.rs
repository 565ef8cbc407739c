//! Pod Tracker
//!
//! Builds a read-only view of the pods owned by a SetupJob. Nothing here is
//! persisted: the view is rebuilt from the object store on every pass.

use job_store::{ObjectStore, StoreError};
use k8s_openapi::api::core::v1::Pod;
use kube::core::{Selector, SelectorExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Pod phase as reported by the kubelet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// A missing phase means the pod has not been picked up yet.
    #[must_use]
    pub fn from_phase(phase: Option<&str>) -> Self {
        match phase {
            None | Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            Some(_) => Self::Unknown,
        }
    }

    /// Succeeded or Failed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One owned pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedPod {
    pub name: String,
    pub node: Option<String>,
    pub phase: PodPhase,
}

impl TrackedPod {
    /// `None` for a pod without a name.
    #[must_use]
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        Some(Self {
            name: pod.metadata.name.clone()?,
            node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            phase: PodPhase::from_phase(pod.status.as_ref().and_then(|s| s.phase.as_deref())),
        })
    }
}

/// Pod counts for the status counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodCounts {
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
}

/// Owned pods of one job, keyed by pod name
#[derive(Debug, Clone, Default)]
pub struct PodObservation {
    pods: BTreeMap<String, TrackedPod>,
}

impl PodObservation {
    /// Builds an observation from already-filtered pods.
    pub fn from_pods(pods: impl IntoIterator<Item = TrackedPod>) -> Self {
        Self {
            pods: pods.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    /// Records a pod created during this pass. It counts as Pending.
    pub fn record_created(&mut self, name: String, node: String) {
        self.record(TrackedPod {
            name,
            node: Some(node),
            phase: PodPhase::Pending,
        });
    }

    /// Adds a pod the list missed. A pod already observed is kept as is.
    pub fn record(&mut self, pod: TrackedPod) {
        self.pods.entry(pod.name.clone()).or_insert(pod);
    }

    /// Number of distinct pods observed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    /// Counters. `active` covers Pending, Running and Unknown, so the three
    /// counters always add up to `len()`.
    #[must_use]
    pub fn counts(&self) -> PodCounts {
        let mut counts = PodCounts::default();
        for pod in self.pods.values() {
            match pod.phase {
                PodPhase::Succeeded => counts.succeeded += 1,
                PodPhase::Failed => counts.failed += 1,
                PodPhase::Pending | PodPhase::Running | PodPhase::Unknown => counts.active += 1,
            }
        }
        counts
    }

    /// Nodes that already have at least one owned pod.
    #[must_use]
    pub fn nodes_with_pods(&self) -> BTreeSet<&str> {
        self.pods.values().filter_map(|p| p.node.as_deref()).collect()
    }

    fn on_node<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a TrackedPod> + 'a {
        self.pods.values().filter(move |p| p.node.as_deref() == Some(node))
    }

    /// Whether `node` has a Succeeded pod.
    #[must_use]
    pub fn node_succeeded(&self, node: &str) -> bool {
        self.on_node(node).any(|p| p.phase == PodPhase::Succeeded)
    }

    /// Whether `node` has a pod that reached a terminal phase.
    #[must_use]
    pub fn node_finished(&self, node: &str) -> bool {
        self.on_node(node).any(|p| p.phase.is_terminal())
    }

    /// Whether `node` has a Failed pod.
    #[must_use]
    pub fn node_failed(&self, node: &str) -> bool {
        self.on_node(node).any(|p| p.phase == PodPhase::Failed)
    }
}

/// Whether `pod` is controlled by the job with `job_uid`.
#[must_use]
pub fn is_owned_by(pod: &Pod, job_uid: &str) -> bool {
    pod.metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.controller == Some(true) && owner.uid == job_uid)
}

/// Reads owned pods from the object store
#[derive(Clone)]
pub struct PodTracker {
    store: Arc<dyn ObjectStore>,
}

impl PodTracker {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Pods in `namespace` controlled by `job_uid` that satisfy `selector`.
    ///
    /// A store failure is returned as an error; a job without pods yields an
    /// empty observation.
    pub async fn observe(
        &self,
        namespace: &str,
        job_uid: &str,
        selector: &Selector,
    ) -> Result<PodObservation, StoreError> {
        let pods = self.store.list_pods(namespace, selector).await?;
        let empty = BTreeMap::new();
        let owned = pods
            .iter()
            // List results may come from a lagging cache, check the selector again
            .filter(|pod| selector.matches(pod.metadata.labels.as_ref().unwrap_or(&empty)))
            .filter(|pod| is_owned_by(pod, job_uid))
            .filter_map(TrackedPod::from_pod);
        let observation = PodObservation::from_pods(owned);
        debug!(
            "Observed {} pods in {} controlled by {}",
            observation.len(),
            namespace,
            job_uid
        );
        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::pods::pod_selector;
    use crate::test_utils::*;
    use crds::SetupJob;
    use job_store::MemoryStore;

    fn uid_of(job: &SetupJob) -> String {
        job.metadata.uid.clone().unwrap()
    }

    fn tracked(name: &str, node: &str, phase: PodPhase) -> TrackedPod {
        TrackedPod {
            name: name.to_string(),
            node: Some(node.to_string()),
            phase,
        }
    }

    #[test]
    fn test_phase_classification() {
        assert_eq!(PodPhase::from_phase(None), PodPhase::Pending);
        assert_eq!(PodPhase::from_phase(Some("Pending")), PodPhase::Pending);
        assert_eq!(PodPhase::from_phase(Some("Running")), PodPhase::Running);
        assert_eq!(PodPhase::from_phase(Some("Succeeded")), PodPhase::Succeeded);
        assert_eq!(PodPhase::from_phase(Some("Failed")), PodPhase::Failed);
        assert_eq!(PodPhase::from_phase(Some("Evicted")), PodPhase::Unknown);
    }

    #[test]
    fn test_counts_add_up_to_observed_pods() {
        let observation = PodObservation::from_pods([
            tracked("a", "n1", PodPhase::Pending),
            tracked("b", "n2", PodPhase::Running),
            tracked("c", "n3", PodPhase::Unknown),
            tracked("d", "n4", PodPhase::Succeeded),
            tracked("e", "n5", PodPhase::Failed),
        ]);
        let counts = observation.counts();
        assert_eq!(counts, PodCounts { active: 3, succeeded: 1, failed: 1 });
        let total = usize::try_from(counts.active + counts.succeeded + counts.failed).unwrap();
        assert_eq!(total, observation.len());
    }

    #[test]
    fn test_duplicate_pod_names_counted_once() {
        let observation = PodObservation::from_pods([
            tracked("a", "n1", PodPhase::Running),
            tracked("a", "n1", PodPhase::Running),
        ]);
        assert_eq!(observation.len(), 1);
    }

    #[test]
    fn test_per_node_queries() {
        let mut observation = PodObservation::from_pods([
            tracked("a", "n1", PodPhase::Succeeded),
            tracked("b", "n2", PodPhase::Failed),
        ]);
        observation.record_created("c".to_string(), "n3".to_string());

        assert!(observation.node_succeeded("n1"));
        assert!(observation.node_finished("n2"));
        assert!(observation.node_failed("n2"));
        assert!(!observation.node_finished("n3"));
        assert_eq!(observation.nodes_with_pods().len(), 3);
        assert_eq!(observation.counts().active, 1);
    }

    #[test]
    fn test_record_keeps_observed_pod() {
        let mut observation = PodObservation::from_pods([tracked("a", "n1", PodPhase::Succeeded)]);
        observation.record(tracked("a", "n1", PodPhase::Pending));
        observation.record(tracked("b", "n2", PodPhase::Running));
        assert_eq!(observation.counts(), PodCounts { active: 1, succeeded: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_observe_filters_by_owner() {
        let store = MemoryStore::new();
        let job = store.add_job(create_test_job("setup", "default"));
        let selector = pod_selector(&job).unwrap();

        store.add_pod(create_owned_pod(&job, "node-a", Some("Running")));
        // Same labels, different controller
        let mut foreign = create_owned_pod(&job, "node-b", Some("Running"));
        foreign.metadata.owner_references = None;
        store.add_pod(foreign);

        let tracker = PodTracker::new(Arc::new(store));
        let observation = tracker.observe("default", &uid_of(&job), &selector).await.unwrap();
        assert_eq!(observation.len(), 1);
        assert_eq!(observation.nodes_with_pods(), BTreeSet::from(["node-a"]));
    }

    #[tokio::test]
    async fn test_observe_with_no_pods_is_empty_not_error() {
        let store = MemoryStore::new();
        let job = store.add_job(create_test_job("setup", "default"));
        let selector = pod_selector(&job).unwrap();

        let tracker = PodTracker::new(Arc::new(store));
        let observation = tracker.observe("default", &uid_of(&job), &selector).await.unwrap();
        assert!(observation.is_empty());
    }

    #[tokio::test]
    async fn test_observe_surfaces_store_failure() {
        let store = MemoryStore::new();
        let job = store.add_job(create_test_job("setup", "default"));
        let selector = pod_selector(&job).unwrap();
        store.fail_list_pods(true);

        let tracker = PodTracker::new(Arc::new(store));
        let result = tracker.observe("default", &uid_of(&job), &selector).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
