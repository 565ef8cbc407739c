//! SetupJob CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the SetupJob controller.

pub mod conditions;
pub mod setup_job;

pub use conditions::ConditionSet;
pub use setup_job::*;
