//! Kubernetes resource watchers.
//!
//! Drives the reconciler from SetupJob and Pod events using
//! `kube_runtime::Controller`, which runs at most one reconcile per object
//! key at a time and parallelizes across keys.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::reconciler::{PassOutcome, Reconciler};
use crds::SetupJob;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, watcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info};

/// Shared state of the reconcile callbacks
pub struct Context {
    reconciler: Arc<Reconciler>,
    backoffs: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl Context {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    /// Next requeue delay for `key`, advancing its backoff.
    fn next_backoff(&self, key: &str) -> Duration {
        let mut backoffs = self.backoffs.lock().unwrap_or_else(PoisonError::into_inner);
        backoffs.entry(key.to_string()).or_default().next_backoff()
    }

    fn reset_backoff(&self, key: &str) {
        self.backoffs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

fn job_key(job: &SetupJob) -> String {
    format!("{}/{}", job.namespace().unwrap_or_default(), job.name_any())
}

async fn reconcile(job: Arc<SetupJob>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = job_key(&job);
    let namespace = job.namespace().ok_or_else(|| {
        ControllerError::Reconciliation(format!("SetupJob {} has no namespace", job.name_any()))
    })?;
    debug!("Reconciling SetupJob {}", key);

    let pass = ctx.reconciler.reconcile(&namespace, &job.name_any()).await?;
    debug!("SetupJob {} pass outcome: {:?}", key, pass.outcome);
    match pass.outcome {
        PassOutcome::Conflict => {
            let delay = ctx.next_backoff(&key);
            debug!("Requeueing SetupJob {} in {:?} after a conflict", key, delay);
            Ok(Action::requeue(delay))
        }
        _ => {
            ctx.reset_backoff(&key);
            Ok(pass.requeue_after.map_or_else(Action::await_change, Action::requeue))
        }
    }
}

fn error_policy(job: Arc<SetupJob>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = job_key(&job);
    let delay = ctx.next_backoff(&key);
    error!("Reconciliation error for SetupJob {}: {} (retry in {:?})", key, error, delay);
    Action::requeue(delay)
}

/// Watches SetupJobs and the pods they own.
pub struct Watcher {
    context: Arc<Context>,
    jobs_api: Api<SetupJob>,
    pods_api: Api<Pod>,
    controller_config: ControllerConfig,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        jobs_api: Api<SetupJob>,
        pods_api: Api<Pod>,
        debounce: Duration,
        concurrency: u16,
    ) -> Self {
        Self {
            context: Arc::new(Context::new(reconciler)),
            jobs_api,
            pods_api,
            controller_config: ControllerConfig::default()
                .debounce(debounce)
                .concurrency(concurrency),
        }
    }

    /// Runs until SIGINT or SIGTERM.
    pub async fn watch_setup_jobs(self) -> Result<(), ControllerError> {
        info!("Starting SetupJob watcher");
        Controller::new(self.jobs_api, watcher::Config::default())
            .owns(self.pods_api, watcher::Config::default())
            .with_config(self.controller_config)
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.context)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _action)) => debug!("Reconciled SetupJob {}", obj),
                    Err(e) => error!("Controller error for SetupJob: {}", e),
                }
            })
            .await;
        info!("SetupJob watcher stopped");
        Ok(())
    }
}
