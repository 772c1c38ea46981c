//! Scaler error taxonomy.

use std::time::Duration;

use thiserror::Error;

pub type ScalerResult<T> = Result<T, ScalerError>;

/// Errors raised while constructing or polling a scaler.
///
/// Construction-time variants ([`ScalerError::is_configuration`]) stand
/// until the spec is corrected; everything else is transient and retried
/// on the next poll.
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("unknown trigger type {0:?}")]
    UnknownTriggerType(String),

    #[error("invalid {trigger_type} trigger metadata: {reason}")]
    Config { trigger_type: String, reason: String },

    #[error("authentication reference {0:?} could not be resolved")]
    AuthNotFound(String),

    #[error("scaler call timed out after {0:?}")]
    Timeout(Duration),

    #[error("scaler call cancelled")]
    Cancelled,

    #[error("scaler instance was replaced while it was being built")]
    Superseded,

    #[error("external source error: {0}")]
    Source(#[from] anyhow::Error),
}

impl ScalerError {
    pub fn config(trigger_type: &str, reason: impl Into<String>) -> Self {
        ScalerError::Config {
            trigger_type: trigger_type.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that retrying cannot fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ScalerError::UnknownTriggerType(_)
                | ScalerError::Config { .. }
                | ScalerError::AuthNotFound(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ScalerError::Timeout(_))
    }
}
