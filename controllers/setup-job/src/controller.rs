//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the object store,
//! reconciler, TTL collector and metrics server together and runs them as
//! background tasks.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::ttl::TtlCollector;
use crate::watcher::Watcher;
use job_store::{KubeStore, ObjectStore};
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for SetupJob management.
pub struct Controller {
    setup_job_watcher: JoinHandle<Result<(), ControllerError>>,
    ttl_collector: JoinHandle<()>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing SetupJob Controller");

        let kube_client = Client::try_default().await?;
        let store = KubeStore::new(kube_client, config.namespace.clone(), config.retry_policy());
        let shared_store: Arc<dyn ObjectStore> = Arc::new(store.clone());
        let metrics = Arc::new(Metrics::new()?);

        let reconciler = Arc::new(Reconciler::new(
            shared_store.clone(),
            metrics.clone(),
            config.probe_refresh,
            config.resync_interval,
        ));
        let watcher = Watcher::new(
            reconciler,
            store.jobs_api(),
            store.pods_api(),
            config.debounce,
            config.concurrency,
        );
        let collector = TtlCollector::new(shared_store, metrics.clone(), config.ttl_scan_interval);

        let metrics_server = {
            let metrics = metrics.clone();
            let addr = config.metrics_addr;
            tokio::spawn(async move { metrics::serve(addr, metrics).await })
        };
        let setup_job_watcher = tokio::spawn(async move { watcher.watch_setup_jobs().await });
        let ttl_collector = tokio::spawn(async move { collector.run().await });
        metrics.set_ready(true);

        Ok(Self {
            setup_job_watcher,
            ttl_collector,
            metrics_server,
        })
    }

    /// Runs until the watcher stops on a shutdown signal or any task fails.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("SetupJob Controller running");

        let result = tokio::select! {
            result = &mut self.setup_job_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("SetupJob watcher panicked: {}", e)))?
            }
            result = &mut self.ttl_collector => {
                result.map_err(|e| ControllerError::Watch(format!("TTL collector panicked: {}", e)))?;
                Err(ControllerError::Watch("TTL collector stopped".to_string()))
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Metrics(format!("Metrics server panicked: {}", e)))?
            }
        };

        // The remaining tasks stop with the controller
        self.ttl_collector.abort();
        self.metrics_server.abort();
        self.setup_job_watcher.abort();
        if let Err(e) = &result {
            warn!("SetupJob Controller stopping: {}", e);
        } else {
            info!("SetupJob Controller stopped");
        }
        result
    }
}
