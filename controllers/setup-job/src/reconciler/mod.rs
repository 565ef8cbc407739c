//! SetupJob reconciliation
//!
//! One pass per job key: observe the owned pods, create the missing ones,
//! recompute the status and write it back with compare-and-swap. A pass never
//! deletes pods and never merges with a concurrent writer; on conflict it stops
//! and the next trigger starts over from fresh state.

pub mod conditions;
pub mod deadline;
pub mod pod_tracker;
pub mod pods;


use crate::error::ControllerError;
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use conditions::{EvaluationInput, JobPhase};
use crds::{SetupJob, SetupJobStatus};
use job_store::{ObjectStore, StoreError};
use pod_tracker::{PodObservation, PodTracker, TrackedPod};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What a single pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// A new status was written
    Written,
    /// The stored status was already current
    Unchanged,
    /// The job changed under us, nothing was written
    Conflict,
    /// The job is gone or being deleted
    Abandoned,
    /// The job cannot be acted on until it is edited
    InvalidSpec(String),
}

impl PassOutcome {
    /// Metric label for the outcome.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Unchanged => "unchanged",
            Self::Conflict => "conflict",
            Self::Abandoned => "abandoned",
            Self::InvalidSpec(_) => "invalid_spec",
        }
    }
}

/// Outcome of a pass plus when the job should be looked at again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassResult {
    pub outcome: PassOutcome,
    /// `None` waits for the next change event
    pub requeue_after: Option<Duration>,
}

impl PassResult {
    fn new(outcome: PassOutcome, requeue_after: Option<Duration>) -> Self {
        Self { outcome, requeue_after }
    }
}

/// Reconciler for SetupJob resources
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    tracker: PodTracker,
    metrics: Arc<Metrics>,
    probe_refresh: Duration,
    resync_interval: Duration,
}

impl Reconciler {
    /// Creates a new reconciler over `store`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metrics: Arc<Metrics>,
        probe_refresh: Duration,
        resync_interval: Duration,
    ) -> Self {
        Self {
            tracker: PodTracker::new(store.clone()),
            store,
            metrics,
            probe_refresh,
            resync_interval,
        }
    }

    /// Runs one pass for `namespace/name` at the current time.
    ///
    /// # Errors
    ///
    /// Store failures that survived the retry policy.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<PassResult, ControllerError> {
        let started = Instant::now();
        let result = self.reconcile_at(namespace, name, Utc::now()).await;
        self.metrics
            .reconcile_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        match &result {
            Ok(pass) => self.metrics.record_outcome(pass.outcome.label()),
            Err(_) => self.metrics.record_outcome("error"),
        }
        result
    }

    /// Runs one pass as if the clock read `now`.
    ///
    /// # Errors
    ///
    /// Store failures that survived the retry policy.
    pub async fn reconcile_at(
        &self,
        namespace: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<PassResult, ControllerError> {
        let job = match self.store.get_job(namespace, name).await {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => {
                debug!("SetupJob {}/{} not found, nothing to do", namespace, name);
                return Ok(PassResult::new(PassOutcome::Abandoned, None));
            }
            Err(e) => return Err(e.into()),
        };
        if job.metadata.deletion_timestamp.is_some() {
            debug!("SetupJob {}/{} is being deleted", namespace, name);
            return Ok(PassResult::new(PassOutcome::Abandoned, None));
        }

        let prev = job.status.clone().unwrap_or_default();
        if prev.is_finished() {
            let next = conditions::refresh_terminal(&prev, now);
            return self.write_status(namespace, name, job, next, now, None).await;
        }

        let selector = match pods::validate(&job) {
            Ok(selector) => selector,
            Err(e) => {
                warn!("SetupJob {}/{} skipped: {}", namespace, name, e);
                return Ok(PassResult::new(PassOutcome::InvalidSpec(e.to_string()), None));
            }
        };
        let job_uid = job.metadata.uid.clone().unwrap_or_default();
        let mut observation = self.tracker.observe(namespace, &job_uid, &selector).await?;
        let eligible = self.eligible_nodes(&job).await?;

        let mut start_time = prev.start_time;
        if start_time.is_none() && !observation.is_empty() {
            start_time = Some(now);
        }

        // A job that is already past its deadline or backoff limit gets no new pods
        let early = deadline::evaluate(&job.spec, start_time, observation.counts().failed, now);
        if early.is_none() {
            self.create_missing_pods(namespace, &job, &eligible, &mut observation).await;
            if start_time.is_none() && !observation.is_empty() {
                start_time = Some(now);
            }
        }

        let verdict = deadline::evaluate(&job.spec, start_time, observation.counts().failed, now);
        let input = EvaluationInput {
            observation: &observation,
            eligible_nodes: &eligible,
            start_time,
            verdict,
        };
        let next = conditions::evaluate(&prev, &input, now);

        let requeue = if JobPhase::of(&next).is_terminal() {
            None
        } else {
            let until_deadline = deadline::time_until_deadline(&job.spec, start_time, now);
            Some(until_deadline.map_or(self.resync_interval, |d| d.min(self.resync_interval)))
        };
        self.write_status(namespace, name, job, next, now, requeue).await
    }

    async fn eligible_nodes(&self, job: &SetupJob) -> Result<BTreeSet<String>, StoreError> {
        let nodes = self.store.list_nodes(&pods::node_selector(job)).await?;
        Ok(nodes
            .iter()
            .filter(|node| pods::is_schedulable(node))
            .filter_map(|node| node.metadata.name.clone())
            .collect())
    }

    /// Creates a pod on every eligible node that has none. Failures are logged
    /// and counted; those nodes are retried on a later pass.
    async fn create_missing_pods(
        &self,
        namespace: &str,
        job: &SetupJob,
        eligible: &BTreeSet<String>,
        observation: &mut PodObservation,
    ) {
        let job_name = job.metadata.name.as_deref().unwrap_or_default();
        let covered = observation.nodes_with_pods();
        let missing: Vec<String> = eligible
            .iter()
            .filter(|node| !covered.contains(node.as_str()))
            .cloned()
            .collect();

        for node in missing {
            let pod = match pods::build_pod(job, &node) {
                Ok(pod) => pod,
                Err(e) => {
                    warn!("Cannot build pod for SetupJob {}/{} on {}: {}", namespace, job_name, node, e);
                    self.metrics.pod_create_errors_total.inc();
                    continue;
                }
            };
            let pod_name = pod.metadata.name.clone().unwrap_or_default();
            match self.store.create_pod(namespace, &pod).await {
                Ok(_) => {
                    info!("Created pod {}/{} on node {}", namespace, pod_name, node);
                    self.metrics.pods_created_total.inc();
                    observation.record_created(pod_name, node);
                }
                Err(StoreError::AlreadyExists(_)) => {
                    if let Some(existing) = self.adopt_existing(namespace, job, &pod_name).await {
                        debug!("Pod {}/{} already exists", namespace, pod_name);
                        observation.record(existing);
                    } else {
                        self.metrics.pod_create_errors_total.inc();
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to create pod {}/{} on node {}: {}",
                        namespace, pod_name, node, e
                    );
                    self.metrics.pod_create_errors_total.inc();
                }
            }
        }
    }

    /// The pod behind an AlreadyExists reply, if `job` controls it.
    async fn adopt_existing(&self, namespace: &str, job: &SetupJob, pod_name: &str) -> Option<TrackedPod> {
        let job_uid = job.metadata.uid.as_deref().unwrap_or_default();
        match self.store.get_pod(namespace, pod_name).await {
            Ok(existing) if pod_tracker::is_owned_by(&existing, job_uid) => TrackedPod::from_pod(&existing),
            Ok(_) => {
                warn!(
                    "Pod {}/{} exists but is not controlled by SetupJob {}",
                    namespace,
                    pod_name,
                    job.metadata.name.as_deref().unwrap_or_default()
                );
                None
            }
            Err(e) => {
                warn!("Pod {}/{} exists but could not be read: {}", namespace, pod_name, e);
                None
            }
        }
    }

    async fn write_status(
        &self,
        namespace: &str,
        name: &str,
        mut job: SetupJob,
        next: SetupJobStatus,
        now: DateTime<Utc>,
        requeue: Option<Duration>,
    ) -> Result<PassResult, ControllerError> {
        if !conditions::needs_write(job.status.as_ref(), &next, now, self.probe_refresh) {
            return Ok(PassResult::new(PassOutcome::Unchanged, requeue));
        }

        let was = job.status.as_ref().map_or(JobPhase::Pending, JobPhase::of);
        let phase = JobPhase::of(&next);
        job.status = Some(next);
        match self.store.replace_job_status(&job).await {
            Ok(_) => {
                if phase != was && phase.is_terminal() {
                    let reason = job
                        .status
                        .as_ref()
                        .and_then(SetupJobStatus::finished_condition)
                        .map(|c| c.reason.clone())
                        .unwrap_or_default();
                    info!("SetupJob {}/{} finished: {:?} ({})", namespace, name, phase, reason);
                }
                Ok(PassResult::new(PassOutcome::Written, requeue))
            }
            Err(StoreError::Conflict(msg)) => {
                debug!("Status write for SetupJob {}/{} conflicted: {}", namespace, name, msg);
                Ok(PassResult::new(PassOutcome::Conflict, None))
            }
            Err(StoreError::NotFound(_)) => {
                debug!("SetupJob {}/{} deleted during the pass", namespace, name);
                Ok(PassResult::new(PassOutcome::Abandoned, None))
            }
            Err(e) => Err(e.into()),
        }
    }
}
