//! Condition Engine
//!
//! Turns a pod observation plus the evaluator's verdict into the next
//! `SetupJobStatus`. The job moves Pending → Active → Complete | Failed, and a
//! terminal condition is never reverted once recorded.

use super::deadline::{FailureReason, Verdict};
use super::pod_tracker::PodObservation;
use chrono::{DateTime, Utc};
use crds::{ConditionSet, ConditionStatus, SetupJobConditionType, SetupJobStatus};
use std::collections::BTreeSet;
use std::time::Duration;

/// Completion reason written on the Complete condition
pub const REASON_COMPLETED: &str = "AllNodesSucceeded";

/// Lifecycle phase derived from a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Active,
    Complete,
    Failed,
}

impl JobPhase {
    #[must_use]
    pub fn of(status: &SetupJobStatus) -> Self {
        match status.finished_condition().map(|c| c.type_) {
            Some(SetupJobConditionType::Complete) => Self::Complete,
            Some(SetupJobConditionType::Failed) => Self::Failed,
            None if status.start_time.is_some() => Self::Active,
            None => Self::Pending,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Everything the engine needs from one pass
#[derive(Debug)]
pub struct EvaluationInput<'a> {
    pub observation: &'a PodObservation,
    /// Nodes eligible at evaluation time
    pub eligible_nodes: &'a BTreeSet<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub verdict: Option<Verdict>,
}

/// Every eligible node finished and at least one of them failed.
fn nodes_exhausted(input: &EvaluationInput<'_>) -> Option<Verdict> {
    let observation = input.observation;
    if input.eligible_nodes.is_empty() || observation.counts().active > 0 {
        return None;
    }
    let all_finished = input.eligible_nodes.iter().all(|n| observation.node_finished(n));
    let failed: Vec<&str> = input
        .eligible_nodes
        .iter()
        .filter(|n| observation.node_failed(n))
        .map(String::as_str)
        .collect();
    if !all_finished || failed.is_empty() {
        return None;
    }
    Some(Verdict {
        reason: FailureReason::NodesExhausted,
        message: format!("No pod left to run on nodes: {}", failed.join(", ")),
    })
}

fn all_nodes_succeeded(input: &EvaluationInput<'_>) -> bool {
    !input.eligible_nodes.is_empty()
        && input.observation.counts().active == 0
        && input
            .eligible_nodes
            .iter()
            .all(|n| input.observation.node_succeeded(n))
}

/// Computes the status after one pass.
///
/// A finished `prev` only gets its probe times refreshed.
#[must_use]
pub fn evaluate(prev: &SetupJobStatus, input: &EvaluationInput<'_>, now: DateTime<Utc>) -> SetupJobStatus {
    if prev.is_finished() {
        return refresh_terminal(prev, now);
    }

    let counts = input.observation.counts();
    let mut conditions = ConditionSet::from_conditions(prev.conditions.clone());
    conditions.touch_all(now);
    let mut completion_time = None;

    if let Some(verdict) = input.verdict.clone().or_else(|| nodes_exhausted(input)) {
        conditions.set(
            SetupJobConditionType::Failed,
            ConditionStatus::True,
            verdict.reason.as_str(),
            &verdict.message,
            now,
        );
    } else if all_nodes_succeeded(input) {
        conditions.set(
            SetupJobConditionType::Complete,
            ConditionStatus::True,
            REASON_COMPLETED,
            &format!("Pods succeeded on all {} eligible nodes", input.eligible_nodes.len()),
            now,
        );
        completion_time = Some(input.start_time.map_or(now, |start| start.max(now)));
    }

    SetupJobStatus {
        conditions: conditions.into_conditions(),
        start_time: input.start_time,
        completion_time,
        active: counts.active,
        succeeded: counts.succeeded,
        failed: counts.failed,
    }
}

/// Status of a finished job on a later pass: probe times move, nothing else.
#[must_use]
pub fn refresh_terminal(prev: &SetupJobStatus, now: DateTime<Utc>) -> SetupJobStatus {
    let mut conditions = ConditionSet::from_conditions(prev.conditions.clone());
    conditions.touch_all(now);
    SetupJobStatus {
        conditions: conditions.into_conditions(),
        ..prev.clone()
    }
}

/// Copy of `status` with every `lastProbeTime` cleared to the epoch.
#[must_use]
pub fn without_probe_times(status: &SetupJobStatus) -> SetupJobStatus {
    let mut stripped = status.clone();
    for condition in &mut stripped.conditions {
        condition.last_probe_time = DateTime::<Utc>::UNIX_EPOCH;
    }
    stripped
}

/// Whether `new` has to be written over `prev`.
///
/// A change in anything but probe times always writes. A probe-only change
/// writes once the oldest stored probe is at least `probe_refresh` old.
#[must_use]
pub fn needs_write(
    prev: Option<&SetupJobStatus>,
    new: &SetupJobStatus,
    now: DateTime<Utc>,
    probe_refresh: Duration,
) -> bool {
    let Some(prev) = prev else {
        return true;
    };
    if without_probe_times(prev) != without_probe_times(new) {
        return true;
    }
    let Some(oldest_probe) = prev.conditions.iter().map(|c| c.last_probe_time).min() else {
        return false;
    };
    now.signed_duration_since(oldest_probe)
        .to_std()
        .is_ok_and(|age| age >= probe_refresh)
}
