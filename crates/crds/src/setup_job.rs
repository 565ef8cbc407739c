//! SetupJob CRD
//!
//! A job that runs exactly one pod on every eligible node of the cluster.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API group served by the SetupJob CRD
pub const API_GROUP: &str = "setup-batch.k8s.io";

/// Label carrying the UID of the owning SetupJob (default pod selector)
pub const CONTROLLER_UID_LABEL: &str = "setup-batch.k8s.io/controller-uid";

/// Label carrying the name of the owning SetupJob
pub const JOB_NAME_LABEL: &str = "setup-batch.k8s.io/job-name";

/// Backoff limit applied when `backoffLimit` is unset
pub const DEFAULT_BACKOFF_LIMIT: i32 = 6;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "setup-batch.k8s.io",
    version = "v1alpha1",
    kind = "SetupJob",
    namespaced,
    status = "SetupJobStatus",
    shortname = "sj",
    printcolumn = r#"{"name":"Active","type":"integer","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Succeeded","type":"integer","jsonPath":".status.succeeded"}"#,
    printcolumn = r#"{"name":"Failed","type":"integer","jsonPath":".status.failed"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SetupJobSpec {
    /// Seconds relative to `startTime` the job may stay active before it is
    /// marked Failed. Must be positive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,

    /// Number of failed pods tolerated before the job is marked Failed.
    /// Defaults to 6.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,

    /// Label query over the pods of this job.
    /// Defaults to the controller-uid label when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Pod created on every eligible node.
    /// `template.spec.nodeSelector` decides which nodes are eligible.
    pub template: PodTemplateSpec,

    /// Seconds after finishing (Complete or Failed) after which the job is
    /// eligible for automatic deletion. Unset means never; zero means
    /// immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
}

impl SetupJobSpec {
    /// Backoff limit with the default applied.
    #[must_use]
    pub fn backoff_limit(&self) -> i32 {
        self.backoff_limit.unwrap_or(DEFAULT_BACKOFF_LIMIT)
    }

    /// Node selector from the pod template. Empty means every node.
    #[must_use]
    pub fn node_selector(&self) -> BTreeMap<String, String> {
        self.template
            .spec
            .as_ref()
            .and_then(|spec| spec.node_selector.clone())
            .unwrap_or_default()
    }
}

/// List of SetupJobs as returned by the API server
pub type SetupJobList = kube::core::ObjectList<SetupJob>;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetupJobStatus {
    /// Latest observations of the job's state. At most one entry per type.
    #[serde(default)]
    pub conditions: Vec<SetupJobCondition>,

    /// Time the controller first observed or created a pod for this job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// Time the job completed. Only set on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Number of pods not yet in a terminal phase
    #[serde(default)]
    pub active: i32,

    /// Number of pods in phase Succeeded
    #[serde(default)]
    pub succeeded: i32,

    /// Number of pods in phase Failed
    #[serde(default)]
    pub failed: i32,
}

impl SetupJobStatus {
    /// Condition of the given type, if recorded.
    #[must_use]
    pub fn condition(&self, type_: SetupJobConditionType) -> Option<&SetupJobCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// The terminal (Status=True) Complete or Failed condition, if any.
    #[must_use]
    pub fn finished_condition(&self) -> Option<&SetupJobCondition> {
        self.conditions.iter().find(|c| c.is_terminal())
    }

    /// Whether the job reached Complete or Failed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished_condition().is_some()
    }

    /// When the job finished: `completionTime` on success, otherwise the
    /// transition time of the terminal condition.
    #[must_use]
    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        let condition = self.finished_condition()?;
        match condition.type_ {
            SetupJobConditionType::Complete => {
                Some(self.completion_time.unwrap_or(condition.last_transition_time))
            }
            SetupJobConditionType::Failed => Some(condition.last_transition_time),
        }
    }
}

/// Valid values for `SetupJobCondition.type`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum SetupJobConditionType {
    /// The job ran to completion on every eligible node
    Complete,
    /// The job failed its execution
    Failed,
}

impl SetupJobConditionType {
    /// Wire name of the condition type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SetupJobConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The controller cannot decide
    #[default]
    Unknown,
}

/// Observation of one aspect of a SetupJob's state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetupJobCondition {
    /// Type of condition, Complete or Failed
    #[serde(rename = "type")]
    pub type_: SetupJobConditionType,

    /// Status of the condition, one of True, False, Unknown
    pub status: ConditionStatus,

    /// Last time the condition was checked
    pub last_probe_time: DateTime<Utc>,

    /// Last time the condition moved from one status to another
    pub last_transition_time: DateTime<Utc>,

    /// Brief reason for the last transition
    #[serde(default)]
    pub reason: String,

    /// Human readable details about the last transition
    #[serde(default)]
    pub message: String,
}

impl SetupJobCondition {
    /// Complete or Failed with Status=True.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status == ConditionStatus::True
    }
}
