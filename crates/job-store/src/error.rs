//! Object store errors

use thiserror::Error;

/// Errors that can occur when talking to the object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error that does not map to a more specific variant
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// Update rejected because the version token was stale
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Call did not finish within the configured timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server unavailable or throttling (5xx, 429, transport failure)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Request rejected as invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl StoreError {
    /// Whether the call may succeed if simply repeated.
    ///
    /// Conflicts are not transient here: the caller holds a stale object and
    /// has to re-read before writing again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }

    /// Maps a kube client error onto the store taxonomy.
    #[must_use]
    pub fn from_kube(error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(response) => {
                let message = response.message.clone();
                match (response.code, response.reason.as_str()) {
                    (404, _) => Self::NotFound(message),
                    (409, "AlreadyExists") => Self::AlreadyExists(message),
                    (409, _) => Self::Conflict(message),
                    (429 | 500 | 502 | 503 | 504, _) => Self::Unavailable(message),
                    (400 | 422, _) => Self::InvalidRequest(message),
                    _ => Self::Kube(error),
                }
            }
            kube::Error::HyperError(_) | kube::Error::Service(_) => {
                Self::Unavailable(error.to_string())
            }
            _ => Self::Kube(error),
        }
    }
}
