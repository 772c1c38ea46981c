//! Pause annotation parsing.
//!
//! The annotation is an externally mutable control channel, so it is
//! parsed fresh on every evaluation into the closed [`PauseState`] type.

use serde::{Deserialize, Serialize};

/// Parsed value of the paused-replicas annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PauseState {
    Unpaused,
    Paused { replicas: u32 },
    /// Annotation present but not a non-negative integer.
    InvalidAnnotation { value: String },
}

impl PauseState {
    /// Parse the raw annotation value (`None` when the annotation is absent).
    pub fn parse(annotation: Option<&str>) -> Self {
        match annotation {
            None => PauseState::Unpaused,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(replicas) => PauseState::Paused { replicas },
                Err(_) => PauseState::InvalidAnnotation {
                    value: raw.to_string(),
                },
            },
        }
    }

    pub fn paused_replicas(&self) -> Option<u32> {
        match self {
            PauseState::Paused { replicas } => Some(*replicas),
            _ => None,
        }
    }
}
