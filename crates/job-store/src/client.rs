//! Kubernetes-backed object store
//!
//! Wraps `kube::Api` for SetupJobs, Pods and Nodes. Every call goes through
//! the `RetryPolicy`, so it is bounded by a timeout and transient failures are
//! retried with backoff.

use crate::error::StoreError;
use crate::retry::RetryPolicy;
use crate::store_trait::ObjectStore;
use crds::SetupJob;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions};
use kube::core::Selector;
use kube::{Api, Client};
use tracing::debug;

/// Object store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    namespace: Option<String>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("namespace", &self.namespace)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Creates a store. `namespace = None` watches SetupJobs in every namespace.
    #[must_use]
    pub fn new(client: Client, namespace: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            namespace,
            retry,
        }
    }

    /// SetupJob API scoped to the configured namespace.
    #[must_use]
    pub fn jobs_api(&self) -> Api<SetupJob> {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Pod API scoped to the configured namespace.
    #[must_use]
    pub fn pods_api(&self) -> Api<Pod> {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn jobs_in(&self, namespace: &str) -> Api<SetupJob> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods_in(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<SetupJob, StoreError> {
        let api = self.jobs_in(namespace);
        self.retry
            .run(&format!("get SetupJob {namespace}/{name}"), || async {
                api.get(name).await.map_err(StoreError::from_kube)
            })
            .await
    }

    async fn list_jobs(&self) -> Result<Vec<SetupJob>, StoreError> {
        let api = self.jobs_api();
        let lp = ListParams::default();
        let list = self
            .retry
            .run("list SetupJobs", || async {
                api.list(&lp).await.map_err(StoreError::from_kube)
            })
            .await?;
        Ok(list.items)
    }

    async fn replace_job_status(&self, job: &SetupJob) -> Result<SetupJob, StoreError> {
        let name = job
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::InvalidRequest("SetupJob missing name".to_string()))?;
        let namespace = job
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| StoreError::InvalidRequest("SetupJob missing namespace".to_string()))?;
        let resource_version = job.metadata.resource_version.as_deref().ok_or_else(|| {
            StoreError::InvalidRequest(format!("SetupJob {namespace}/{name} missing resourceVersion"))
        })?;

        // resourceVersion in the patch body makes the API server reject stale writes with 409
        let status = serde_json::to_value(&job.status)?;
        let status_patch = serde_json::json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        let api = self.jobs_in(namespace);
        let pp = PatchParams::default();
        debug!("Writing status of SetupJob {}/{} at version {}", namespace, name, resource_version);
        self.retry
            .run(&format!("update SetupJob {namespace}/{name} status"), || async {
                api.patch_status(name, &pp, &Patch::Merge(&status_patch))
                    .await
                    .map_err(StoreError::from_kube)
            })
            .await
    }

    async fn delete_job(&self, namespace: &str, name: &str, uid: &str) -> Result<(), StoreError> {
        let api = self.jobs_in(namespace);
        let mut dp = DeleteParams::foreground();
        dp.preconditions = Some(Preconditions {
            uid: Some(uid.to_string()),
            resource_version: None,
        });
        self.retry
            .run(&format!("delete SetupJob {namespace}/{name}"), || async {
                api.delete(name, &dp)
                    .await
                    .map(|_| ())
                    .map_err(StoreError::from_kube)
            })
            .await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        let api = self.pods_in(namespace);
        self.retry
            .run(&format!("get pod {namespace}/{name}"), || async {
                api.get(name).await.map_err(StoreError::from_kube)
            })
            .await
    }

    async fn list_pods(&self, namespace: &str, selector: &Selector) -> Result<Vec<Pod>, StoreError> {
        let api = self.pods_in(namespace);
        let lp = ListParams::default().labels_from(selector);
        let list = self
            .retry
            .run(&format!("list pods in {namespace}"), || async {
                api.list(&lp).await.map_err(StoreError::from_kube)
            })
            .await?;
        Ok(list.items)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError> {
        let api = self.pods_in(namespace);
        let pp = PostParams::default();
        let name = pod.metadata.name.as_deref().unwrap_or("<generated>");
        self.retry
            .run(&format!("create pod {namespace}/{name}"), || async {
                api.create(&pp, pod).await.map_err(StoreError::from_kube)
            })
            .await
    }

    async fn list_nodes(&self, node_selector: &Selector) -> Result<Vec<Node>, StoreError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let lp = ListParams::default().labels_from(node_selector);
        let list = self
            .retry
            .run("list nodes", || async {
                api.list(&lp).await.map_err(StoreError::from_kube)
            })
            .await?;
        Ok(list.items)
    }
}
