//! Object store boundary for the SetupJob controller
//!
//! The controller consumes the Kubernetes API server through the
//! [`ObjectStore`] trait: get/list/update/delete on SetupJobs, list/create on
//! Pods, and list on Nodes. Status updates carry the object's
//! `resourceVersion`, so a stale writer gets `StoreError::Conflict` instead of
//! overwriting a newer status.
//!
//! # Example
//!
//! ```no_run
//! use job_store::{KubeStore, ObjectStore, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeStore::new(client, Some("default".to_string()), RetryPolicy::default());
//!
//! for job in store.list_jobs().await? {
//!     println!("{:?}", job.metadata.name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Optimistic concurrency**: status writes are compare-and-swap on `resourceVersion`
//! - **Retry Logic**: bounded calls with exponential backoff on transient errors
//! - **test-util**: in-memory [`MemoryStore`] for unit tests

pub mod client;
pub mod error;
pub mod retry;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeStore;
pub use error::StoreError;
pub use retry::RetryPolicy;
pub use store_trait::ObjectStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MemoryStore;
