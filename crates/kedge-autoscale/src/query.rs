//! On-demand metric queries from the cluster autoscaler.
//!
//! Every query runs under a single deadline covering scaler resolution
//! and the metric fetch, so a slow source can never stall the caller past
//! `query_timeout`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use kedge_core::{MetricValue, ScalingTarget};
use kedge_scaler::{LabelSelector, PollContext, Scaler, ScalerError};
use kedge_state::{StateError, StateStore};

use crate::engine::Engine;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("scaling target {0} not found")]
    TargetNotFound(String),

    #[error("metric {metric} not exposed by {target_id}")]
    MetricNotFound { target_id: String, metric: String },

    #[error(transparent)]
    Scaler(#[from] ScalerError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl QueryError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, QueryError::Scaler(e) if e.is_timeout())
    }
}

pub type QueryResult<T> = Result<T, QueryError>;

pub struct MetricQueryService {
    store: StateStore,
    engine: Arc<Engine>,
    timeout: Duration,
}

impl MetricQueryService {
    pub fn new(store: StateStore, engine: Arc<Engine>, timeout: Duration) -> Self {
        Self {
            store,
            engine,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current values of `metric_name` for `target_id`.
    pub async fn query(
        &self,
        target_id: &str,
        metric_name: &str,
        selector: &LabelSelector,
    ) -> QueryResult<Vec<MetricValue>> {
        let target = self
            .store
            .get_target(target_id)?
            .ok_or_else(|| QueryError::TargetNotFound(target_id.to_string()))?;

        let ctx = PollContext::new(self.timeout);
        let scaler = match ctx.run(self.find_scaler(&target, metric_name)).await {
            Ok(Some(scaler)) => scaler,
            Ok(None) => {
                return Err(QueryError::MetricNotFound {
                    target_id: target_id.to_string(),
                    metric: metric_name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let values = self
            .engine
            .query_metric(&scaler, metric_name, selector, &ctx)
            .await?;
        debug!(%target_id, metric = %metric_name, count = values.len(), "metric query served");
        Ok(values)
    }

    /// The scaler exposing `metric_name`. The trigger named by the
    /// `s{index}-` prefix is tried first. A trigger that fails to build is
    /// skipped unless no other trigger exposes the metric.
    async fn find_scaler(
        &self,
        target: &ScalingTarget,
        metric_name: &str,
    ) -> Result<Option<Arc<dyn Scaler>>, ScalerError> {
        let count = target.triggers.len();
        let first = prefix_index(metric_name).filter(|i| *i < count);
        let order: Vec<usize> = first
            .into_iter()
            .chain((0..count).filter(|i| Some(*i) != first))
            .collect();

        let mut first_error = None;
        for index in order {
            match self.engine.resolve(target, index).await {
                Ok(scaler) => {
                    if scaler.metric_specs().iter().any(|s| s.name == metric_name) {
                        return Ok(Some(scaler));
                    }
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

fn prefix_index(metric_name: &str) -> Option<usize> {
    let rest = metric_name.strip_prefix('s')?;
    let (digits, _) = rest.split_once('-')?;
    digits.parse().ok()
}
