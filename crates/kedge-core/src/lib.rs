//! kedge-core: declarative types for the Kedge autoscaler.
//!
//! Holds the `ScalingTarget` / `Trigger` spec model, pause annotation
//! parsing, Kubernetes-style quantities, and the `kedge.toml` daemon
//! configuration.

pub mod config;
pub mod error;
pub mod pause;
pub mod quantity;
pub mod types;

pub use config::DaemonConfig;
pub use error::{SpecError, SpecResult};
pub use pause::PauseState;
pub use quantity::Quantity;
pub use types::*;
