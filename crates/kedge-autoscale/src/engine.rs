//! Aggregation engine: evaluates every trigger of a target concurrently.
//!
//! ```text
//! evaluate(target)
//!   ├── trigger 0 ─┐
//!   ├── trigger 1 ─┼── join_all, each under its own PollContext
//!   └── trigger n ─┘
//!         └── resolve scaler → is_active → get_metrics (external specs)
//!
//! active = OR over successful triggers
//! every trigger failed → EvaluationError::AllSourcesFailed
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kedge_core::{MetricValue, ScalingTarget};
use kedge_scaler::{
    AuthResolver, LabelSelector, MetricSpec, PollContext, Scaler, ScalerCatalog, ScalerConfig,
    ScalerError, ScalerKey, ScalerRegistry, ScalerResult,
};

/// Fraction of the polling interval a single scaler call may use.
const INTERVAL_BUDGET: f64 = 0.9;

/// A trigger that produced no result this poll.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFailure {
    pub index: usize,
    pub trigger_type: String,
    /// Rejected by its constructor; retrying will not help.
    pub configuration: bool,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("all {} trigger sources failed", .0.len())]
    AllSourcesFailed(Vec<TriggerFailure>),
}

/// A metric that could not be fetched; the rest of the trigger still counts.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFailure {
    pub metric: String,
    pub message: String,
}

/// What a successfully polled trigger reported.
#[derive(Debug, Clone)]
pub struct TriggerReport {
    pub active: bool,
    pub specs: Vec<MetricSpec>,
    pub metrics: Vec<MetricValue>,
    pub metric_errors: Vec<MetricFailure>,
}

#[derive(Debug)]
pub struct TriggerOutcome {
    pub index: usize,
    pub trigger_type: String,
    pub result: ScalerResult<TriggerReport>,
}

impl TriggerOutcome {
    fn failure(&self) -> Option<TriggerFailure> {
        self.result.as_ref().err().map(|e| TriggerFailure {
            index: self.index,
            trigger_type: self.trigger_type.clone(),
            configuration: e.is_configuration(),
            message: e.to_string(),
        })
    }
}

/// Aggregated activation and metrics for one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingDecision {
    pub active: bool,
    pub metrics: Vec<MetricValue>,
}

/// Per-trigger outcomes of one evaluation pass, in trigger order.
#[derive(Debug)]
pub struct Evaluation {
    pub outcomes: Vec<TriggerOutcome>,
}

impl Evaluation {
    /// Successful trigger reports.
    pub fn reports(&self) -> impl Iterator<Item = &TriggerReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> Vec<TriggerFailure> {
        self.outcomes.iter().filter_map(TriggerOutcome::failure).collect()
    }

    /// True if at least one trigger was evaluated and all of them failed.
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.result.is_err())
    }

    pub fn is_active(&self) -> bool {
        self.reports().any(|r| r.active)
    }

    /// Metrics that failed on otherwise healthy triggers, with the
    /// trigger index.
    pub fn metric_failures(&self) -> impl Iterator<Item = (usize, &MetricFailure)> {
        self.outcomes.iter().flat_map(|o| {
            o.result
                .as_ref()
                .map(|r| r.metric_errors.as_slice())
                .unwrap_or_default()
                .iter()
                .map(move |f| (o.index, f))
        })
    }

    /// Some metric is missing from this pass, so any proposal built from
    /// it may undercount.
    pub fn metrics_incomplete(&self) -> bool {
        self.metric_failures().next().is_some()
    }

    pub fn decision(&self) -> Result<ScalingDecision, EvaluationError> {
        if self.all_failed() {
            return Err(EvaluationError::AllSourcesFailed(self.failures()));
        }
        Ok(ScalingDecision {
            active: self.is_active(),
            metrics: self.reports().flat_map(|r| r.metrics.iter().cloned()).collect(),
        })
    }
}

/// Resolves scalers for targets and polls them.
pub struct Engine {
    catalog: ScalerCatalog,
    registry: Arc<ScalerRegistry>,
    auth: Arc<dyn AuthResolver>,
    scaler_timeout: Duration,
}

impl Engine {
    pub fn new(
        catalog: ScalerCatalog,
        registry: Arc<ScalerRegistry>,
        auth: Arc<dyn AuthResolver>,
        scaler_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            registry,
            auth,
            scaler_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ScalerRegistry> {
        &self.registry
    }

    /// Budget for one scaler call: the configured timeout, capped strictly
    /// below the target's polling interval.
    pub fn call_timeout(&self, target: &ScalingTarget) -> Duration {
        let interval = Duration::from_secs(target.polling_interval_seconds);
        self.scaler_timeout.min(interval.mul_f64(INTERVAL_BUDGET))
    }

    /// Return the live scaler for trigger `index`, constructing it on a
    /// registry miss.
    pub async fn resolve(
        &self,
        target: &ScalingTarget,
        index: usize,
    ) -> ScalerResult<Arc<dyn Scaler>> {
        let trigger = target.triggers.get(index).ok_or_else(|| {
            ScalerError::config("trigger", format!("index {index} out of range"))
        })?;
        let key = ScalerKey::new(&target.id(), index, trigger.fingerprint());
        self.registry
            .get_or_create(&key, || self.build_scaler(target, index))
            .await
    }

    async fn build_scaler(
        &self,
        target: &ScalingTarget,
        index: usize,
    ) -> ScalerResult<Arc<dyn Scaler>> {
        let trigger = &target.triggers[index];
        let auth_params = match &trigger.auth_ref {
            Some(auth_ref) => self.auth.resolve(&target.namespace, auth_ref).await?,
            None => Default::default(),
        };
        let config = ScalerConfig::from_trigger(
            &target.id(),
            index,
            trigger,
            auth_params,
            self.scaler_timeout,
        );
        self.catalog.build(config).await
    }

    /// Poll every trigger of `target` concurrently.
    pub async fn evaluate(&self, target: &ScalingTarget, cancel: &CancellationToken) -> Evaluation {
        let budget = self.call_timeout(target);
        let polls = (0..target.triggers.len())
            .map(|index| self.poll_trigger(target, index, budget, cancel));
        let outcomes = join_all(polls).await;

        let evaluation = Evaluation { outcomes };
        debug!(
            target_id = %target.id(),
            triggers = evaluation.outcomes.len(),
            failed = evaluation.failures().len(),
            active = evaluation.is_active(),
            "triggers evaluated"
        );
        evaluation
    }

    async fn poll_trigger(
        &self,
        target: &ScalingTarget,
        index: usize,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> TriggerOutcome {
        let ctx = PollContext::with_parent(budget, cancel);
        let trigger_type = target.triggers[index].trigger_type.clone();
        let result = self.poll_with(target, index, &ctx).await;

        if let Err(e) = &result {
            warn!(
                target_id = %target.id(),
                trigger = index,
                %trigger_type,
                error = %e,
                "trigger evaluation failed"
            );
        }

        TriggerOutcome {
            index,
            trigger_type,
            result,
        }
    }

    async fn poll_with(
        &self,
        target: &ScalingTarget,
        index: usize,
        ctx: &PollContext,
    ) -> ScalerResult<TriggerReport> {
        let scaler = ctx.run(self.resolve(target, index)).await?;
        let active = ctx.run(scaler.is_active(ctx)).await?;

        let specs = scaler.metric_specs();
        let selector = LabelSelector::new();
        let mut metrics = Vec::new();
        let mut metric_errors = Vec::new();
        for spec in specs.iter().filter(|s| s.is_external()) {
            match ctx.run(scaler.get_metrics(ctx, &spec.name, &selector)).await {
                Ok(values) => metrics.extend(values),
                Err(e) => {
                    warn!(
                        target_id = %target.id(),
                        trigger = index,
                        metric = %spec.name,
                        error = %e,
                        "metric fetch failed"
                    );
                    metric_errors.push(MetricFailure {
                        metric: spec.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(TriggerReport {
            active,
            specs,
            metrics,
            metric_errors,
        })
    }

    /// Fetch one metric from an already resolved scaler under `ctx`.
    pub async fn query_metric(
        &self,
        scaler: &Arc<dyn Scaler>,
        metric_name: &str,
        selector: &LabelSelector,
        ctx: &PollContext,
    ) -> ScalerResult<Vec<MetricValue>> {
        ctx.run(scaler.get_metrics(ctx, metric_name, selector)).await
    }
}
