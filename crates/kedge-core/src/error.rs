//! Validation errors for declarative scaling specs.

use thiserror::Error;

pub type SpecResult<T> = Result<T, SpecError>;

/// Structural problems with a `ScalingTarget` or one of its fields.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpecError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("{field} must not contain '/': {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("minReplicaCount ({min}) must not exceed maxReplicaCount ({max})")]
    ReplicaBounds { min: u32, max: u32 },

    #[error("pollingIntervalSeconds must be greater than zero")]
    ZeroPollingInterval,

    #[error("at least one trigger is required")]
    NoTriggers,

    #[error("trigger {0} has an empty type")]
    EmptyTriggerType(usize),

    #[error("unsupported metric type {0:?}, allowed values are 'Utilization', 'AverageValue' or 'Value'")]
    UnknownMetricType(String),

    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),
}
