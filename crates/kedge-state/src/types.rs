//! Persisted status records for scaling targets.
//!
//! Specs themselves are `kedge_core::ScalingTarget`; this module holds
//! what the controller publishes back after each reconcile pass.

use serde::{Deserialize, Serialize};

use kedge_core::{MetricValue, TargetId};

/// Standing condition on a target, one per taxonomy entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// The last pass produced a decision.
    Ready,
    /// At least one trigger reported activity.
    Active,
    /// A valid pause annotation is in effect.
    Paused,
    /// A trigger's metadata was rejected by its constructor.
    ConfigurationError,
    /// A trigger's external call failed this poll.
    SourceError,
    /// Every trigger failed; the last decision is being held.
    AllSourcesFailed,
    /// The pause annotation could not be parsed.
    InvalidPauseAnnotation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    pub status: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Condition {
    pub fn new(kind: ConditionKind, status: bool, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }
}

/// Per-trigger result of the last evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerHealth {
    pub index: usize,
    pub trigger_type: String,
    /// `None` when the trigger errored.
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Metrics that could not be fetched although the trigger answered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metric_errors: Vec<String>,
}

/// What the controller published for a target on its last pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub target_id: TargetId,
    /// Spec generation this status was computed from.
    pub generation: u64,
    pub active: bool,
    pub desired_replicas: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_replicas: Option<u32>,
    pub metrics: Vec<MetricValue>,
    pub triggers: Vec<TriggerHealth>,
    pub conditions: Vec<Condition>,
    /// Unix timestamp (seconds) of the last active observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<u64>,
    /// Unix timestamp (seconds) when this status was written.
    pub updated_at: u64,
}

impl TargetStatus {
    pub fn condition(&self, kind: ConditionKind) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// True if `kind` is present with a true status.
    pub fn has_condition(&self, kind: ConditionKind) -> bool {
        self.condition(kind).is_some_and(|c| c.status)
    }
}
