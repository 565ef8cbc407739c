//! Desired pod construction and spec validation

use crate::error::ControllerError;
use crds::{CONTROLLER_UID_LABEL, JOB_NAME_LABEL, SetupJob};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::Resource;
use kube::core::{Selector, SelectorExt};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Longest name the API server accepts for a pod
const MAX_POD_NAME_LEN: usize = 253;

/// Hex digits of the job uid and node digest appended to pod names
const NAME_HASH_LEN: usize = 10;

/// Restart policy applied when the template leaves it unset
const DEFAULT_RESTART_POLICY: &str = "Never";

/// Selector used to find the job's pods: `spec.selector` when given,
/// otherwise the controller-uid label.
#[must_use]
pub fn effective_selector(job: &SetupJob) -> LabelSelector {
    if let Some(selector) = &job.spec.selector {
        return selector.clone();
    }
    let uid = job.metadata.uid.clone().unwrap_or_default();
    LabelSelector {
        match_labels: Some(BTreeMap::from([(CONTROLLER_UID_LABEL.to_string(), uid)])),
        match_expressions: None,
    }
}

/// The job's pod selector in evaluable form.
///
/// # Errors
///
/// Returns `ControllerError::InvalidSpec` for an unknown operator or a
/// requirement with the wrong number of values.
pub fn pod_selector(job: &SetupJob) -> Result<Selector, ControllerError> {
    Selector::try_from(effective_selector(job))
        .map_err(|e| ControllerError::InvalidSpec(format!("invalid selector: {e}")))
}

/// Selector for the nodes the job runs on. Empty selects every node.
#[must_use]
pub fn node_selector(job: &SetupJob) -> Selector {
    job.spec.node_selector().into_iter().collect()
}

/// Labels every pod of `job` carries.
#[must_use]
pub fn pod_labels(job: &SetupJob) -> BTreeMap<String, String> {
    let mut labels = job
        .spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    labels.insert(
        CONTROLLER_UID_LABEL.to_string(),
        job.metadata.uid.clone().unwrap_or_default(),
    );
    labels.insert(
        JOB_NAME_LABEL.to_string(),
        job.metadata.name.clone().unwrap_or_default(),
    );
    labels
}

/// Deterministic pod name for `node`, so a retried create hits AlreadyExists
/// instead of producing a second pod.
///
/// The name reads `<job>-<node>-<hash>`. The hash covers the job uid and the
/// node, so two jobs never share a pod name even when `<job>-<node>` does.
#[must_use]
pub fn pod_name(job_name: &str, job_uid: &str, node: &str) -> String {
    let digest = Sha256::new()
        .chain_update(job_uid)
        .chain_update("/")
        .chain_update(node)
        .finalize();
    let hash = hex::encode(digest);

    let mut prefix = format!("{job_name}-{node}");
    let limit = MAX_POD_NAME_LEN - NAME_HASH_LEN - 1;
    if prefix.len() > limit {
        let mut cut = limit;
        while !prefix.is_char_boundary(cut) {
            cut -= 1;
        }
        prefix.truncate(cut);
    }
    // DNS subdomain labels must end alphanumeric
    while prefix.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        prefix.pop();
    }
    format!("{prefix}-{}", &hash[..NAME_HASH_LEN])
}

/// Checks that the job can be acted on and returns its pod selector.
///
/// # Errors
///
/// Returns `ControllerError::InvalidSpec` describing the first problem found.
pub fn validate(job: &SetupJob) -> Result<Selector, ControllerError> {
    if job.metadata.uid.is_none() {
        return Err(ControllerError::InvalidSpec("SetupJob has no uid".to_string()));
    }
    if job.metadata.namespace.is_none() {
        return Err(ControllerError::InvalidSpec("SetupJob has no namespace".to_string()));
    }
    if let Some(deadline) = job.spec.active_deadline_seconds {
        if deadline <= 0 {
            return Err(ControllerError::InvalidSpec(format!(
                "activeDeadlineSeconds must be positive, got {deadline}"
            )));
        }
    }
    if job.spec.backoff_limit.is_some_and(|limit| limit < 0) {
        return Err(ControllerError::InvalidSpec("backoffLimit must not be negative".to_string()));
    }

    let Some(pod_spec) = job.spec.template.spec.as_ref() else {
        return Err(ControllerError::InvalidSpec("template.spec is required".to_string()));
    };
    if pod_spec.containers.is_empty() {
        return Err(ControllerError::InvalidSpec(
            "template.spec.containers must not be empty".to_string(),
        ));
    }
    if pod_spec.restart_policy.as_deref() == Some("Always") {
        return Err(ControllerError::InvalidSpec(
            "template.spec.restartPolicy Always is not allowed, use Never or OnFailure".to_string(),
        ));
    }

    let selector = pod_selector(job)?;
    if !selector.matches(&pod_labels(job)) {
        return Err(ControllerError::InvalidSpec(format!(
            "selector \"{selector}\" does not match template labels"
        )));
    }
    Ok(selector)
}

/// Whether pods may be placed on `node`.
#[must_use]
pub fn is_schedulable(node: &Node) -> bool {
    !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

/// Pod for `node` built from the job's template.
///
/// # Errors
///
/// Returns `ControllerError::InvalidSpec` if the job lacks the identity an
/// owner reference needs.
pub fn build_pod(job: &SetupJob, node: &str) -> Result<Pod, ControllerError> {
    let job_name = job
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidSpec("SetupJob has no name".to_string()))?;
    let job_uid = job
        .metadata
        .uid
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidSpec(format!("SetupJob {job_name} has no uid")))?;
    let owner = job.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::InvalidSpec(format!("SetupJob {job_name} has no uid for an owner reference"))
    })?;

    let template_meta = job.spec.template.metadata.clone().unwrap_or_default();
    let mut spec = job.spec.template.spec.clone().unwrap_or_default();
    spec.node_name = Some(node.to_string());
    spec.restart_policy.get_or_insert_with(|| DEFAULT_RESTART_POLICY.to_string());

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(pod_name(job_name, job_uid, node)),
            namespace: job.metadata.namespace.clone(),
            labels: Some(pod_labels(job)),
            annotations: template_meta.annotations,
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}
