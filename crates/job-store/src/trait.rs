//! ObjectStore trait for mocking
//!
//! This trait abstracts the Kubernetes API server so the reconciler and the
//! TTL collector can be unit tested against an in-memory store.

use crate::error::StoreError;
use crds::SetupJob;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::core::Selector;

/// Operations the controller needs from the object store
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one SetupJob.
    async fn get_job(&self, namespace: &str, name: &str) -> Result<SetupJob, StoreError>;

    /// List every SetupJob in scope.
    async fn list_jobs(&self) -> Result<Vec<SetupJob>, StoreError>;

    /// Write `job.status`, guarded by `job.metadata.resource_version`.
    ///
    /// Fails with `StoreError::Conflict` when the stored version moved on.
    async fn replace_job_status(&self, job: &SetupJob) -> Result<SetupJob, StoreError>;

    /// Delete a SetupJob and cascade to its pods.
    ///
    /// `uid` is a precondition: a job recreated under the same name is left alone.
    async fn delete_job(&self, namespace: &str, name: &str, uid: &str) -> Result<(), StoreError>;

    /// Fetch one pod.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError>;

    /// List pods in `namespace` matching `selector`.
    async fn list_pods(&self, namespace: &str, selector: &Selector) -> Result<Vec<Pod>, StoreError>;

    /// Create a pod.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError>;

    /// List nodes matching `node_selector`.
    async fn list_nodes(&self, node_selector: &Selector) -> Result<Vec<Node>, StoreError>;
}
