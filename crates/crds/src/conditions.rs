//! Ordered condition set
//!
//! Conditions are keyed by type but serialized as a sequence. Updating a type
//! that already exists replaces it in place; a new type is appended.

use crate::setup_job::{ConditionStatus, SetupJobCondition, SetupJobConditionType};
use chrono::{DateTime, Utc};

/// Small ordered map of conditions keyed by `SetupJobConditionType`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSet {
    entries: Vec<SetupJobCondition>,
}

impl ConditionSet {
    /// Builds a set from a serialized list.
    ///
    /// Should the list carry duplicate types, the first entry wins.
    #[must_use]
    pub fn from_conditions(conditions: Vec<SetupJobCondition>) -> Self {
        let mut entries: Vec<SetupJobCondition> = Vec::with_capacity(conditions.len());
        for condition in conditions {
            if !entries.iter().any(|c| c.type_ == condition.type_) {
                entries.push(condition);
            }
        }
        Self { entries }
    }

    /// Condition of the given type.
    #[must_use]
    pub fn get(&self, type_: SetupJobConditionType) -> Option<&SetupJobCondition> {
        self.entries.iter().find(|c| c.type_ == type_)
    }

    /// Records an evaluation of `type_`.
    ///
    /// `last_probe_time` always moves to `now`. `last_transition_time` moves only
    /// when `status` differs from the recorded value. Reason and message are
    /// replaced together.
    pub fn set(
        &mut self,
        type_: SetupJobConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: DateTime<Utc>,
    ) {
        if let Some(existing) = self.entries.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = now;
            }
            existing.last_probe_time = now;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
        } else {
            self.entries.push(SetupJobCondition {
                type_,
                status,
                last_probe_time: now,
                last_transition_time: now,
                reason: reason.to_string(),
                message: message.to_string(),
            });
        }
    }

    /// Refreshes `last_probe_time` of every recorded condition.
    pub fn touch_all(&mut self, now: DateTime<Utc>) {
        for condition in &mut self.entries {
            condition.last_probe_time = now;
        }
    }

    /// Serialized form, in insertion order.
    #[must_use]
    pub fn into_conditions(self) -> Vec<SetupJobCondition> {
        self.entries
    }
}
