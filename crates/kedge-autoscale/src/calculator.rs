//! Proposed replica counts from trigger metrics.

use kedge_core::MetricTargetType;

use crate::engine::Evaluation;

/// Maps an evaluation to an unclamped replica count. The policy clamps.
pub trait ReplicaCalculator: Send + Sync {
    fn desired_replicas(&self, evaluation: &Evaluation) -> u32;
}

/// `ceil(value / target)` per external metric, highest wins.
///
/// An inactive target proposes zero. An active one proposes at least one
/// even when no metric has a usable target. Resource metrics are scaled
/// by the cluster and are ignored here.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProportionalCalculator;

impl ReplicaCalculator for ProportionalCalculator {
    fn desired_replicas(&self, evaluation: &Evaluation) -> u32 {
        if !evaluation.is_active() {
            return 0;
        }

        let mut desired = 1u32;
        for report in evaluation.reports() {
            for spec in report.specs.iter().filter(|s| s.is_external()) {
                let usable = matches!(
                    spec.target.target_type,
                    MetricTargetType::AverageValue | MetricTargetType::Value
                ) && spec.target.value > 0.0;
                if !usable {
                    continue;
                }
                for metric in report.metrics.iter().filter(|m| m.name == spec.name) {
                    let ratio = (metric.value / spec.target.value).ceil();
                    if ratio.is_finite() && ratio > 0.0 {
                        desired = desired.max(ratio.min(f64::from(u32::MAX)) as u32);
                    }
                }
            }
        }
        desired
    }
}
