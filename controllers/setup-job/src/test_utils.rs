//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test data and setting up test scenarios.

#[cfg(test)]
use chrono::{DateTime, TimeZone, Utc};
#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::api::core::v1::{Container, Node, Pod, PodSpec, PodStatus, PodTemplateSpec};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use kube::Resource;
#[cfg(test)]
use std::collections::BTreeMap;

/// Fixed point in time offset by `secs`
#[cfg(test)]
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Helper to create a test SetupJob with an `app=setup` template and one container.
/// No uid is assigned; `MemoryStore::add_job` or `with_uid` does that.
#[cfg(test)]
pub fn create_test_job(name: &str, namespace: &str) -> SetupJob {
    SetupJob {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: SetupJobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(BTreeMap::from([("app".to_string(), "setup".to_string())])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "setup".to_string(),
                        image: Some("busybox:1.36".to_string()),
                        command: Some(vec!["sh".to_string(), "-c".to_string(), "true".to_string()]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        },
        status: None,
    }
}

/// Assigns `uid-<name>` to a job built outside the store
#[cfg(test)]
pub fn with_uid(mut job: SetupJob) -> SetupJob {
    let name = job.metadata.name.clone().unwrap_or_default();
    job.metadata.uid = Some(format!("uid-{name}"));
    job
}

/// Helper to create a pod owned by `job` on `node`, as the reconciler would,
/// with the given phase
#[cfg(test)]
pub fn create_owned_pod(job: &SetupJob, node: &str, phase: Option<&str>) -> Pod {
    let mut pod = crate::reconciler::pods::build_pod(job, node).unwrap_or_default();
    pod.status = phase.map(|p| PodStatus {
        phase: Some(p.to_string()),
        ..Default::default()
    });
    pod
}

/// Helper to create a node with labels
#[cfg(test)]
pub fn create_test_node(name: &str, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Finished status: Complete at `finished_at`, or Failed when `failed` is set
#[cfg(test)]
pub fn finished_status(finished_at: DateTime<Utc>, failed: bool) -> SetupJobStatus {
    let mut conditions = ConditionSet::default();
    let (type_, reason) = if failed {
        (SetupJobConditionType::Failed, "BackoffLimitExceeded")
    } else {
        (SetupJobConditionType::Complete, "AllNodesSucceeded")
    };
    conditions.set(type_, ConditionStatus::True, reason, "", finished_at);
    SetupJobStatus {
        conditions: conditions.into_conditions(),
        start_time: Some(finished_at),
        completion_time: (!failed).then_some(finished_at),
        ..Default::default()
    }
}

/// Owner reference check used by scenario assertions
#[cfg(test)]
pub fn owned_by(pod: &Pod, job: &SetupJob) -> bool {
    job.controller_owner_ref(&())
        .is_some_and(|owner| crate::reconciler::pod_tracker::is_owned_by(pod, &owner.uid))
}
