//! Built-in CPU and memory scalers.
//!
//! These never poll anything: resource metrics come from the cluster's
//! own metrics pipeline. The scaler only validates the trigger metadata
//! and describes the resource metric the cluster autoscaler should use.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use kedge_core::{MetricTargetType, MetricValue, Quantity};

use crate::config::ScalerConfig;
use crate::context::PollContext;
use crate::error::ScalerResult;
use crate::scaler::{LabelSelector, MetricSource, MetricSpec, MetricTarget, Scaler};

/// Which container resource a [`ResourceScaler`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceName {
    Cpu,
    Memory,
}

impl ResourceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceName::Cpu => "cpu",
            ResourceName::Memory => "memory",
        }
    }
}

/// Typed projection of a cpu/memory trigger's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceMetadata {
    pub metric_type: MetricTargetType,
    /// Set for `AverageValue` targets.
    pub average_value: Option<Quantity>,
    /// Set for `Utilization` targets (percent).
    pub average_utilization: Option<u32>,
    pub container_name: Option<String>,
}

impl ResourceMetadata {
    pub fn parse(config: &ScalerConfig) -> ScalerResult<Self> {
        let metric_type = config.resolve_metric_type()?;
        let value = config.required("value")?;

        let (average_value, average_utilization) = match metric_type {
            MetricTargetType::AverageValue => {
                let quantity: Quantity = value
                    .parse()
                    .map_err(|e: kedge_core::SpecError| config.error(e.to_string()))?;
                if quantity.is_negative() {
                    return Err(config.error("value must not be negative"));
                }
                (Some(quantity), None)
            }
            MetricTargetType::Utilization => {
                let percent: i32 = value
                    .parse()
                    .map_err(|_| config.error(format!("value: cannot parse {value:?}")))?;
                let percent = u32::try_from(percent)
                    .map_err(|_| config.error("utilization must not be negative"))?;
                (None, Some(percent))
            }
            MetricTargetType::Value => {
                return Err(config.error(
                    "unsupported metric type, allowed values are 'Utilization' or 'AverageValue'",
                ));
            }
        };

        Ok(Self {
            metric_type,
            average_value,
            average_utilization,
            container_name: config.optional("containerName").map(str::to_string),
        })
    }

    fn target_value(&self) -> f64 {
        match (&self.average_value, self.average_utilization) {
            (Some(q), _) => q.value(),
            (None, Some(percent)) => f64::from(percent),
            (None, None) => 0.0,
        }
    }
}

/// Scaler for the `cpu` and `memory` trigger types.
#[derive(Debug)]
pub struct ResourceScaler {
    resource: ResourceName,
    metadata: ResourceMetadata,
}

impl ResourceScaler {
    pub fn new(resource: ResourceName, config: &ScalerConfig) -> ScalerResult<Self> {
        let metadata = ResourceMetadata::parse(config)?;
        debug!(
            target_id = %config.target_id,
            trigger = config.trigger_index,
            resource = resource.as_str(),
            metric_type = %metadata.metric_type,
            "resource scaler created"
        );
        Ok(Self { resource, metadata })
    }

    pub fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }
}

/// Constructor registered in the builtin catalog.
pub async fn build(resource: ResourceName, config: ScalerConfig) -> ScalerResult<Arc<dyn Scaler>> {
    Ok(Arc::new(ResourceScaler::new(resource, &config)?))
}

#[async_trait]
impl Scaler for ResourceScaler {
    /// Resource triggers are always active; they cannot scale to zero.
    async fn is_active(&self, _ctx: &PollContext) -> ScalerResult<bool> {
        Ok(true)
    }

    fn metric_specs(&self) -> Vec<MetricSpec> {
        vec![MetricSpec {
            name: self.resource.as_str().to_string(),
            target: MetricTarget {
                target_type: self.metadata.metric_type,
                value: self.metadata.target_value(),
            },
            source: MetricSource::Resource {
                resource: self.resource.as_str().to_string(),
                container: self.metadata.container_name.clone(),
            },
        }]
    }

    async fn get_metrics(
        &self,
        _ctx: &PollContext,
        _metric_name: &str,
        _selector: &LabelSelector,
    ) -> ScalerResult<Vec<MetricValue>> {
        Ok(Vec::new())
    }

    async fn close(&self, _ctx: &PollContext) -> ScalerResult<()> {
        Ok(())
    }
}
