//! The validated input handed to every scaler constructor.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use kedge_core::{MetricTargetType, TargetId, Trigger};

use crate::error::{ScalerError, ScalerResult};
use crate::scaler::metric_name;

/// Deprecated metadata key that selects the metric target type.
pub const DEPRECATED_TYPE_KEY: &str = "type";

/// Everything a constructor needs to build one scaler.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    pub target_id: TargetId,
    pub trigger_index: usize,
    pub trigger_type: String,
    pub metadata: BTreeMap<String, String>,
    pub metric_type: Option<MetricTargetType>,
    /// Credential material resolved from the trigger's `authRef`.
    pub auth_params: BTreeMap<String, String>,
    /// Upper bound for any back-end call the constructor makes.
    pub timeout: Duration,
}

impl ScalerConfig {
    pub fn from_trigger(
        target_id: &str,
        trigger_index: usize,
        trigger: &Trigger,
        auth_params: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            target_id: target_id.to_string(),
            trigger_index,
            trigger_type: trigger.trigger_type.clone(),
            metadata: trigger.metadata.clone(),
            metric_type: trigger.metric_type,
            auth_params,
            timeout,
        }
    }

    pub fn error(&self, reason: impl Into<String>) -> ScalerError {
        ScalerError::config(&self.trigger_type, reason)
    }

    /// Exposed metric name for this trigger.
    pub fn metric_name(&self, name: &str) -> String {
        metric_name(self.trigger_index, name)
    }

    /// A non-empty metadata value, or `None`.
    pub fn optional(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// A non-empty metadata value, or a configuration error.
    pub fn required(&self, key: &str) -> ScalerResult<&str> {
        self.optional(key)
            .ok_or_else(|| self.error(format!("no {key} given")))
    }

    /// Parse an optional metadata value, falling back to `default`.
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> ScalerResult<T> {
        match self.optional(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| self.error(format!("{key}: cannot parse {raw:?}"))),
            None => Ok(default),
        }
    }

    /// Resolve the metric target type from exactly one of the deprecated
    /// `metadata.type` key and the typed `metricType` field.
    pub fn resolve_metric_type(&self) -> ScalerResult<MetricTargetType> {
        match (self.optional(DEPRECATED_TYPE_KEY), self.metric_type) {
            (Some(_), Some(_)) => Err(self.error(
                "only one of trigger.metadata.type or trigger.metricType should be defined",
            )),
            (Some(raw), None) => {
                warn!(
                    target_id = %self.target_id,
                    trigger = self.trigger_index,
                    "trigger.metadata.type is deprecated in favor of trigger.metricType"
                );
                raw.parse().map_err(|e: kedge_core::SpecError| self.error(e.to_string()))
            }
            (None, Some(metric_type)) => Ok(metric_type),
            (None, None) => Err(self.error(
                "no type given in neither trigger.metadata.type or trigger.metricType",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(metadata: &[(&str, &str)], metric_type: Option<MetricTargetType>) -> ScalerConfig {
        ScalerConfig {
            target_id: "default/orders".to_string(),
            trigger_index: 0,
            trigger_type: "cpu".to_string(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            metric_type,
            auth_params: BTreeMap::from([("host".to_string(), "queue.local".to_string())]),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn both_type_selectors_is_an_error() {
        let cfg = config(
            &[("type", "Utilization")],
            Some(MetricTargetType::Utilization),
        );
        let err = cfg.resolve_metric_type().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("only one of"));
    }

    #[test]
    fn neither_type_selector_is_an_error() {
        let cfg = config(&[], None);
        assert!(cfg.resolve_metric_type().unwrap_err().is_configuration());
    }

    #[test]
    fn either_type_selector_alone_resolves() {
        let deprecated = config(&[("type", "AverageValue")], None);
        assert_eq!(
            deprecated.resolve_metric_type().unwrap(),
            MetricTargetType::AverageValue
        );
        let typed = config(&[], Some(MetricTargetType::Utilization));
        assert_eq!(typed.resolve_metric_type().unwrap(), MetricTargetType::Utilization);
    }

    #[test]
    fn required_rejects_empty_values() {
        let cfg = config(&[("value", "")], None);
        assert!(cfg.required("value").is_err());
        assert!(cfg.required("missing").is_err());
    }

    #[test]
    fn numeric_parsing() {
        let cfg = config(&[("listLength", "10"), ("bad", "x"), ("neg", "-1")], None);
        assert_eq!(cfg.parse_or("listLength", 5u64).unwrap(), 10);
        assert_eq!(cfg.parse_or("absent", 5u64).unwrap(), 5);
        assert!(cfg.parse_or::<u64>("bad", 5).is_err());
        assert_eq!(cfg.parse_or("neg", 0i64).unwrap(), -1);
    }
}
