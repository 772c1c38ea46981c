//! Scaler plugins for Kedge.
//!
//! A scaler adapts one external event source to the controller. This
//! crate holds the contract every scaler implements, the catalog that
//! maps trigger types to constructors, and the registry that keeps live
//! instances alive between polls.

pub mod auth;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod resource;
pub mod scaler;

pub use auth::{AuthResolver, StaticAuthResolver};
pub use catalog::{BuiltinTrigger, ScalerBuilder, ScalerCatalog};
pub use config::ScalerConfig;
pub use context::PollContext;
pub use error::{ScalerError, ScalerResult};
pub use registry::{ScalerKey, ScalerRegistry};
pub use resource::{ResourceName, ResourceScaler};
pub use scaler::{metric_name, LabelSelector, MetricSource, MetricSpec, MetricTarget, Scaler};
