//! Controller-specific error types.
//!
//! Store failures come from `job_store`; everything else the controller can
//! run into is listed here.

use job_store::StoreError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the SetupJob Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes client error outside the store
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The SetupJob spec cannot be acted on
    #[error("Invalid SetupJob spec: {0}")]
    InvalidSpec(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registration or serving failed
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl From<prometheus::Error> for ControllerError {
    fn from(error: prometheus::Error) -> Self {
        Self::Metrics(error.to_string())
    }
}
