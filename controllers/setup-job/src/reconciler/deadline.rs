//! Deadline & Backoff Evaluator
//!
//! Decides whether a running job has to be failed because it ran past
//! `activeDeadlineSeconds` or collected more failed pods than `backoffLimit`.
//! The deadline check comes first and wins over everything else.

use chrono::{DateTime, TimeDelta, Utc};
use crds::SetupJobSpec;
use std::time::Duration;

/// Why a job is being failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Ran longer than `activeDeadlineSeconds`
    DeadlineExceeded,
    /// More failed pods than `backoffLimit`
    BackoffLimitExceeded,
    /// Every eligible node finished, not all of them successfully
    NodesExhausted,
}

impl FailureReason {
    /// Value written to the condition's `reason`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::BackoffLimitExceeded => "BackoffLimitExceeded",
            Self::NodesExhausted => "NodesExhausted",
        }
    }
}

/// Terminal failure decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub reason: FailureReason,
    pub message: String,
}

fn deadline(spec: &SetupJobSpec) -> Option<TimeDelta> {
    // Values chrono cannot represent are treated as no deadline
    spec.active_deadline_seconds.and_then(TimeDelta::try_seconds)
}

/// Evaluates the deadline, then the backoff limit.
///
/// Without `activeDeadlineSeconds` or without a start time there is no
/// deadline to check.
#[must_use]
pub fn evaluate(
    spec: &SetupJobSpec,
    start_time: Option<DateTime<Utc>>,
    failed: i32,
    now: DateTime<Utc>,
) -> Option<Verdict> {
    if let (Some(limit), Some(start)) = (deadline(spec), start_time) {
        if now.signed_duration_since(start) >= limit {
            return Some(Verdict {
                reason: FailureReason::DeadlineExceeded,
                message: format!(
                    "SetupJob was active longer than specified deadline ({}s)",
                    limit.num_seconds()
                ),
            });
        }
    }

    let backoff_limit = spec.backoff_limit();
    if failed > backoff_limit {
        return Some(Verdict {
            reason: FailureReason::BackoffLimitExceeded,
            message: format!("SetupJob has {failed} failed pods, backoff limit is {backoff_limit}"),
        });
    }

    None
}

/// Time left until the deadline fires, `ZERO` when already past.
#[must_use]
pub fn time_until_deadline(
    spec: &SetupJobSpec,
    start_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let limit = deadline(spec)?;
    let start = start_time?;
    let remaining = start.checked_add_signed(limit)?.signed_duration_since(now);
    Some(remaining.to_std().unwrap_or(Duration::ZERO))
}
