//! Declarative scaling types shared across Kedge crates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SpecError, SpecResult};

/// Unique identifier for a scaling target (`{namespace}/{name}`).
pub type TargetId = String;

/// Annotation whose value pins a target to a fixed replica count.
pub const PAUSED_REPLICAS_ANNOTATION: &str = "autoscaling.kedge.io/paused-replicas";

fn default_polling_interval() -> u64 {
    30
}

fn default_cooldown_period() -> u64 {
    300
}

fn default_max_replicas() -> u32 {
    100
}

// ── ScalingTarget ──────────────────────────────────────────────────

/// A workload plus the policy that decides how many replicas it runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingTarget {
    pub namespace: String,
    pub name: String,
    /// The workload whose replica count is driven.
    pub scale_target_ref: WorkloadRef,
    #[serde(default)]
    pub min_replica_count: u32,
    #[serde(default = "default_max_replicas")]
    pub max_replica_count: u32,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_seconds: u64,
    #[serde(default = "default_cooldown_period")]
    pub cooldown_period_seconds: u64,
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Bumped by the store on every spec change.
    #[serde(default)]
    pub generation: u64,
}

/// Reference to the scaled workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRef {
    #[serde(default = "WorkloadRef::default_kind")]
    pub kind: String,
    pub name: String,
}

impl WorkloadRef {
    fn default_kind() -> String {
        "Deployment".to_string()
    }
}

impl ScalingTarget {
    /// Composite key used in the store and in every registry/policy map.
    pub fn id(&self) -> TargetId {
        format!("{}/{}", self.namespace, self.name)
    }

    /// The raw pause annotation value, if present.
    pub fn pause_annotation(&self) -> Option<&str> {
        self.annotations
            .get(PAUSED_REPLICAS_ANNOTATION)
            .map(String::as_str)
    }

    /// Clamp a replica count into `[min, max]`.
    pub fn clamp(&self, replicas: u32) -> u32 {
        replicas.clamp(self.min_replica_count, self.max_replica_count)
    }

    /// Structural validation. Trigger metadata is validated later by the
    /// scaler constructor for each trigger type, not here.
    pub fn validate(&self) -> SpecResult<()> {
        if self.namespace.is_empty() || self.name.is_empty() {
            return Err(SpecError::MissingField("namespace/name"));
        }
        for (field, value) in [("namespace", &self.namespace), ("name", &self.name)] {
            if value.contains('/') {
                return Err(SpecError::InvalidIdentifier {
                    field,
                    value: value.clone(),
                });
            }
        }
        if self.scale_target_ref.name.is_empty() {
            return Err(SpecError::MissingField("scaleTargetRef.name"));
        }
        if self.min_replica_count > self.max_replica_count {
            return Err(SpecError::ReplicaBounds {
                min: self.min_replica_count,
                max: self.max_replica_count,
            });
        }
        if self.polling_interval_seconds == 0 {
            return Err(SpecError::ZeroPollingInterval);
        }
        if self.triggers.is_empty() {
            return Err(SpecError::NoTriggers);
        }
        for (index, trigger) in self.triggers.iter().enumerate() {
            if trigger.trigger_type.trim().is_empty() {
                return Err(SpecError::EmptyTriggerType(index));
            }
        }
        Ok(())
    }
}

// ── Trigger ────────────────────────────────────────────────────────

/// One configured external event source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_ref: Option<AuthRef>,
    /// Typed replacement for the deprecated `metadata.type` key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<MetricTargetType>,
}

impl Trigger {
    /// Hex SHA-256 over the trigger's canonical JSON. Metadata is a
    /// `BTreeMap`, so key order never changes the fingerprint.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

/// Opaque reference to credential material, resolved outside the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AuthRef {
    pub name: String,
}

/// How a metric value is compared against its target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MetricTargetType {
    AverageValue,
    Utilization,
    Value,
}

impl MetricTargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricTargetType::AverageValue => "AverageValue",
            MetricTargetType::Utilization => "Utilization",
            MetricTargetType::Value => "Value",
        }
    }
}

impl fmt::Display for MetricTargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricTargetType {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AverageValue" => Ok(MetricTargetType::AverageValue),
            "Utilization" => Ok(MetricTargetType::Utilization),
            "Value" => Ok(MetricTargetType::Value),
            other => Err(SpecError::UnknownMetricType(other.to_string())),
        }
    }
}

/// A single measured value reported by a scaler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricValue {
    pub name: String,
    pub value: f64,
}

impl MetricValue {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
