//! Prometheus metrics and the health endpoints
//!
//! Served by a small axum router: `/metrics` in the Prometheus text format,
//! `/healthz` always 200 while the process runs, `/readyz` 200 once the
//! controller has started watching.

use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// Controller metrics, registered in their own registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub reconcile_total: IntCounterVec,
    pub pods_created_total: IntCounter,
    pub pod_create_errors_total: IntCounter,
    pub ttl_deleted_total: IntCounter,
    pub reconcile_duration_seconds: Histogram,
    ready: Arc<AtomicBool>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates and registers every metric.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Metrics` if registration fails.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("setupjob_reconcile_total", "Reconciliation passes by outcome"),
            &["outcome"],
        )?;
        let pods_created_total = IntCounter::new("setupjob_pods_created_total", "Pods created for SetupJobs")?;
        let pod_create_errors_total = IntCounter::new(
            "setupjob_pod_create_errors_total",
            "Pod creations that failed and will be retried",
        )?;
        let ttl_deleted_total = IntCounter::new(
            "setupjob_ttl_deleted_total",
            "Finished SetupJobs deleted after their TTL",
        )?;
        let reconcile_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "setupjob_reconcile_duration_seconds",
            "Duration of a reconciliation pass",
        ))?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(pods_created_total.clone()))?;
        registry.register(Box::new(pod_create_errors_total.clone()))?;
        registry.register(Box::new(ttl_deleted_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            pods_created_total,
            pod_create_errors_total,
            ttl_deleted_total,
            reconcile_duration_seconds,
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Counts one pass with the given outcome label.
    pub fn record_outcome(&self, outcome: &str) {
        self.reconcile_total.with_label_values(&[outcome]).inc();
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Current metrics in the Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Metrics` if encoding fails.
    pub fn encode(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Metrics(e.to_string()))
    }
}

async fn serve_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> StatusCode {
    if metrics.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Router for the metrics and health endpoints.
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(metrics)
}

/// Serves the router on `addr` until the task is dropped.
///
/// # Errors
///
/// Returns `ControllerError::Metrics` if the address cannot be bound or the
/// server stops with an error.
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Metrics(format!("bind {addr}: {e}")))?;
    info!("Serving metrics on {}", addr);
    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ControllerError::Metrics(e.to_string()))
}
