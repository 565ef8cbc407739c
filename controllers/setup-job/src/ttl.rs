//! TTL garbage collection of finished SetupJobs
//!
//! Runs on its own interval, independent of the reconcile workers. A finished
//! job with `ttlSecondsAfterFinished` is deleted with foreground propagation
//! once its TTL has passed, which takes its pods with it. The only coordination
//! with the reconciler is the UID precondition on the delete.

use crate::metrics::Metrics;
use chrono::{DateTime, TimeDelta, Utc};
use crds::SetupJob;
use job_store::{ObjectStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Jobs deleted by this scan
    pub deleted: usize,
    /// Finished jobs whose TTL has not passed yet
    pub pending: usize,
    /// Jobs without a TTL, not finished, or already being deleted
    pub skipped: usize,
}

/// Instant after which `job` may be deleted, if ever.
#[must_use]
pub fn expires_at(job: &SetupJob) -> Option<DateTime<Utc>> {
    let ttl = job.spec.ttl_seconds_after_finished?;
    let finished = job.status.as_ref()?.finish_time()?;
    let ttl = TimeDelta::try_seconds(i64::from(ttl.max(0)))?;
    finished.checked_add_signed(ttl)
}

/// Periodic collector of expired jobs
pub struct TtlCollector {
    store: Arc<dyn ObjectStore>,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl TtlCollector {
    pub fn new(store: Arc<dyn ObjectStore>, metrics: Arc<Metrics>, interval: Duration) -> Self {
        Self {
            store,
            metrics,
            interval,
        }
    }

    /// Scans forever. A failed scan is logged and the next tick tries again.
    pub async fn run(&self) {
        info!("Starting TTL collector, scanning every {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.scan_at(Utc::now()).await {
                Ok(report) if report.deleted > 0 => {
                    info!("TTL scan deleted {} SetupJobs ({} pending)", report.deleted, report.pending);
                }
                Ok(report) => debug!("TTL scan: {:?}", report),
                Err(e) => warn!("TTL scan failed: {}", e),
            }
        }
    }

    /// One scan as if the clock read `now`.
    ///
    /// # Errors
    ///
    /// Returns the store error if jobs cannot be listed. Errors deleting a
    /// single job are logged and leave that job for the next scan.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> Result<ScanReport, StoreError> {
        let mut report = ScanReport::default();
        for job in self.store.list_jobs().await? {
            if job.metadata.deletion_timestamp.is_some() {
                report.skipped += 1;
                continue;
            }
            let Some(expiry) = expires_at(&job) else {
                report.skipped += 1;
                continue;
            };
            if now < expiry {
                report.pending += 1;
                continue;
            }
            if self.delete(&job).await {
                report.deleted += 1;
            }
        }
        Ok(report)
    }

    async fn delete(&self, job: &SetupJob) -> bool {
        let name = job.metadata.name.as_deref().unwrap_or_default();
        let (Some(namespace), Some(uid)) = (job.metadata.namespace.as_deref(), job.metadata.uid.as_deref()) else {
            warn!("SetupJob {} has no namespace or uid, not deleting", name);
            return false;
        };
        match self.store.delete_job(namespace, name, uid).await {
            Ok(()) => {
                info!("Deleted SetupJob {}/{} after its TTL", namespace, name);
                self.metrics.ttl_deleted_total.inc();
                true
            }
            // Gone already, or replaced by a new object with the same name
            Err(StoreError::NotFound(_) | StoreError::Conflict(_)) => {
                debug!("SetupJob {}/{} already deleted or replaced", namespace, name);
                false
            }
            Err(e) => {
                warn!("Failed to delete expired SetupJob {}/{}: {}", namespace, name, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use job_store::MemoryStore;

    fn collector(store: &MemoryStore) -> TtlCollector {
        TtlCollector::new(
            Arc::new(store.clone()),
            Arc::new(Metrics::new().unwrap()),
            Duration::from_secs(15),
        )
    }

    fn finished_job(name: &str, ttl: Option<i32>, finished_at: i64, failed: bool) -> SetupJob {
        let mut job = create_test_job(name, "default");
        job.spec.ttl_seconds_after_finished = ttl;
        job.status = Some(finished_status(at(finished_at), failed));
        job
    }

    #[test]
    fn test_expires_at() {
        assert_eq!(expires_at(&finished_job("a", Some(30), 100, false)), Some(at(130)));
        assert_eq!(expires_at(&finished_job("b", Some(30), 100, true)), Some(at(130)));
        assert_eq!(expires_at(&finished_job("c", None, 100, false)), None);

        let mut running = create_test_job("d", "default");
        running.spec.ttl_seconds_after_finished = Some(0);
        assert_eq!(expires_at(&running), None);
    }

    #[tokio::test]
    async fn test_never_deletes_before_expiry() {
        let store = MemoryStore::new();
        store.add_job(finished_job("setup", Some(60), 0, false));
        let gc = collector(&store);

        let report = gc.scan_at(at(59)).await.unwrap();
        assert_eq!(report, ScanReport { deleted: 0, pending: 1, skipped: 0 });
        assert!(store.job("default", "setup").is_some());
    }

    #[tokio::test]
    async fn test_deletes_at_expiry_with_pods() {
        let store = MemoryStore::new();
        let job = store.add_job(finished_job("setup", Some(60), 0, true));
        store.add_pod(create_owned_pod(&job, "node-a", Some("Failed")));
        let gc = collector(&store);

        let report = gc.scan_at(at(60)).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.job("default", "setup").is_none());
        assert!(store.pods().is_empty());
        assert_eq!(store.deleted_jobs(), vec![("default".to_string(), "setup".to_string())]);
    }

    #[tokio::test]
    async fn test_zero_ttl_deletes_on_next_scan() {
        let store = MemoryStore::new();
        store.add_job(finished_job("setup", Some(0), 10, false));
        let report = collector(&store).scan_at(at(10)).await.unwrap();
        assert_eq!(report.deleted, 1);
    }

    #[tokio::test]
    async fn test_jobs_without_ttl_or_unfinished_are_kept() {
        let store = MemoryStore::new();
        store.add_job(finished_job("no-ttl", None, 0, false));
        let mut running = create_test_job("running", "default");
        running.spec.ttl_seconds_after_finished = Some(0);
        store.add_job(running);

        let report = collector(&store).scan_at(at(1_000_000)).await.unwrap();
        assert_eq!(report, ScanReport { deleted: 0, pending: 0, skipped: 2 });
        assert!(store.deleted_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_scans_are_idempotent() {
        let store = MemoryStore::new();
        store.add_job(finished_job("setup", Some(5), 0, false));
        let gc = collector(&store);

        assert_eq!(gc.scan_at(at(5)).await.unwrap().deleted, 1);
        assert_eq!(gc.scan_at(at(6)).await.unwrap(), ScanReport::default());
        assert_eq!(store.deleted_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_completion_time_takes_precedence() {
        let store = MemoryStore::new();
        let mut job = finished_job("setup", Some(10), 0, false);
        if let Some(status) = job.status.as_mut() {
            status.completion_time = Some(at(50));
        }
        store.add_job(job);
        let gc = collector(&store);

        assert_eq!(gc.scan_at(at(55)).await.unwrap().pending, 1);
        assert_eq!(gc.scan_at(at(60)).await.unwrap().deleted, 1);
    }
}
