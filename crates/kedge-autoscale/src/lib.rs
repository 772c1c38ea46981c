//! kedge-autoscale: the Kedge controller.
//!
//! Polls each scaling target's triggers, folds the results into one
//! activation signal, applies pause and cooldown rules, and publishes the
//! resulting replica count.
//!
//! # Decision pipeline
//!
//! ```text
//! triggers ──▶ Engine::evaluate      concurrent, per-call deadline
//!          ──▶ ReplicaCalculator     ceil(value / target), highest wins
//!          ──▶ Policy::decide        pause > all-failed hold > cooldown
//!          ──▶ TargetStatus + ScaleCallback
//! ```
//!
//! The cluster autoscaler pulls metric values separately through
//! [`MetricQueryService`].

pub mod calculator;
pub mod engine;
pub mod policy;
pub mod query;
pub mod reconciler;

pub use calculator::{ProportionalCalculator, ReplicaCalculator};
pub use engine::{
    Engine, Evaluation, EvaluationError, MetricFailure, ScalingDecision, TriggerFailure,
    TriggerOutcome, TriggerReport,
};
pub use policy::{DecisionReason, Observation, Policy, PolicyOutcome, PolicyState, PolicyStore};
pub use query::{MetricQueryService, QueryError, QueryResult};
pub use reconciler::{Reconciler, ScaleCallback, ScaleFuture};
