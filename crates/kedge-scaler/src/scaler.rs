//! The scaler plugin contract.
//!
//! Every trigger type (queue length, stream backlog, CPU, ...) is a
//! [`Scaler`]. The controller only ever talks to triggers through these
//! four operations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use kedge_core::{MetricTargetType, MetricValue};

use crate::context::PollContext;
use crate::error::ScalerResult;

/// Label selector passed through from the metric query endpoint.
pub type LabelSelector = BTreeMap<String, String>;

#[async_trait]
pub trait Scaler: Send + Sync {
    /// Whether this trigger alone justifies scaling above zero/minimum.
    async fn is_active(&self, ctx: &PollContext) -> ScalerResult<bool>;

    /// Static description of the metrics this scaler feeds to the
    /// cluster autoscaler. Pure, no I/O.
    fn metric_specs(&self) -> Vec<MetricSpec>;

    /// Fetch current values for `metric_name`. Must be safe to call
    /// concurrently with [`Scaler::is_active`].
    async fn get_metrics(
        &self,
        ctx: &PollContext,
        metric_name: &str,
        selector: &LabelSelector,
    ) -> ScalerResult<Vec<MetricValue>>;

    /// Release held resources. Idempotent.
    async fn close(&self, ctx: &PollContext) -> ScalerResult<()>;
}

/// Static description of one metric a scaler exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    pub target: MetricTarget,
    pub source: MetricSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTarget {
    #[serde(rename = "type")]
    pub target_type: MetricTargetType,
    pub value: f64,
}

/// Where the cluster autoscaler reads the metric from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricSource {
    /// Served by the metric query endpoint.
    External,
    /// Served by the cluster's own resource metrics pipeline.
    Resource {
        resource: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container: Option<String>,
    },
}

impl MetricSpec {
    pub fn is_external(&self) -> bool {
        matches!(self.source, MetricSource::External)
    }
}

/// Build the exposed metric name for a trigger: `s{index}-{name}`.
///
/// The index prefix keeps two triggers of the same type from colliding.
/// Characters outside `[a-z0-9-.]` become `-`.
pub fn metric_name(trigger_index: usize, name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("s{trigger_index}-{sanitized}")
}
