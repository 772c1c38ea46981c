//! End-to-end controller scenarios against fake queue sources.
//!
//! Each test drives `Reconciler::reconcile_once` on a paused clock so
//! cooldown windows can be stepped through deterministically.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use kedge_autoscale::{Engine, Policy, Reconciler};
use kedge_core::{MetricTargetType, MetricValue, ScalingTarget, Trigger, WorkloadRef};
use kedge_core::PAUSED_REPLICAS_ANNOTATION;
use kedge_scaler::{
    LabelSelector, MetricSource, MetricSpec, MetricTarget, PollContext, Scaler, ScalerCatalog,
    ScalerConfig, ScalerError, ScalerRegistry, ScalerResult, StaticAuthResolver,
};
use kedge_state::{ConditionKind, StateStore};

/// Backlog value that makes the broker refuse metric reads while still
/// answering activity checks.
const UNREADABLE: u64 = u64::MAX;

/// Active while the shared backlog is non-empty; one replica per
/// `listLength` messages.
struct QueueScaler {
    backlog: Arc<AtomicU64>,
    metric: String,
    list_length: f64,
}

#[async_trait]
impl Scaler for QueueScaler {
    async fn is_active(&self, _ctx: &PollContext) -> ScalerResult<bool> {
        Ok(self.backlog.load(Ordering::SeqCst) > 0)
    }

    fn metric_specs(&self) -> Vec<MetricSpec> {
        vec![MetricSpec {
            name: self.metric.clone(),
            target: MetricTarget {
                target_type: MetricTargetType::AverageValue,
                value: self.list_length,
            },
            source: MetricSource::External,
        }]
    }

    async fn get_metrics(
        &self,
        _ctx: &PollContext,
        metric_name: &str,
        _selector: &LabelSelector,
    ) -> ScalerResult<Vec<MetricValue>> {
        let backlog = self.backlog.load(Ordering::SeqCst);
        if backlog == UNREADABLE {
            return Err(ScalerError::Source(anyhow::anyhow!("queue depth unavailable")));
        }
        Ok(vec![MetricValue::new(metric_name, backlog as f64)])
    }

    async fn close(&self, _ctx: &PollContext) -> ScalerResult<()> {
        Ok(())
    }
}

/// Queues are looked up by the `queueName` metadata key.
#[derive(Default, Clone)]
struct Queues(Arc<std::sync::Mutex<BTreeMap<String, Arc<AtomicU64>>>>);

impl Queues {
    fn backlog(&self, name: &str) -> Arc<AtomicU64> {
        let mut queues = self.0.lock().unwrap();
        Arc::clone(queues.entry(name.to_string()).or_default())
    }

    fn set(&self, name: &str, messages: u64) {
        self.backlog(name).store(messages, Ordering::SeqCst);
    }
}

fn catalog(queues: &Queues) -> ScalerCatalog {
    let queues = queues.clone();
    ScalerCatalog::builtin().with("queue", move |config: ScalerConfig| {
        let queues = queues.clone();
        async move {
            let queue = config.required("queueName")?.to_string();
            let list_length = config.parse_or("listLength", 5.0)?;
            if list_length <= 0.0 {
                return Err(config.error("listLength must be positive"));
            }
            Ok::<Arc<dyn Scaler>, ScalerError>(Arc::new(QueueScaler {
                backlog: queues.backlog(&queue),
                metric: config.metric_name(&format!("queue-{queue}")),
                list_length,
            }))
        }
    })
}

fn queue_trigger(queue: &str) -> Trigger {
    Trigger {
        trigger_type: "queue".to_string(),
        name: None,
        metadata: BTreeMap::from([("queueName".to_string(), queue.to_string())]),
        auth_ref: None,
        metric_type: None,
    }
}

fn target(min: u32, max: u32, cooldown: u64, triggers: Vec<Trigger>) -> ScalingTarget {
    ScalingTarget {
        namespace: "default".to_string(),
        name: "orders".to_string(),
        scale_target_ref: WorkloadRef {
            kind: "Deployment".to_string(),
            name: "orders-worker".to_string(),
        },
        min_replica_count: min,
        max_replica_count: max,
        polling_interval_seconds: 5,
        cooldown_period_seconds: cooldown,
        triggers,
        annotations: BTreeMap::new(),
        generation: 1,
    }
}

fn reconciler(queues: &Queues) -> Reconciler {
    let store = StateStore::open_in_memory().unwrap();
    let engine = Engine::new(
        catalog(queues),
        Arc::new(ScalerRegistry::default()),
        Arc::new(StaticAuthResolver::default()),
        Duration::from_secs(3),
    );
    Reconciler::new(store, Arc::new(engine), Policy::default())
}

async fn replicas(r: &Reconciler, target: &ScalingTarget) -> u32 {
    r.reconcile_once(target).await.unwrap().desired_replicas
}

#[tokio::test(start_paused = true)]
async fn queue_scenario_scales_up_and_back_after_cooldown() {
    let queues = Queues::default();
    let r = reconciler(&queues);
    let t = target(1, 2, 60, vec![queue_trigger("orders")]);

    assert_eq!(replicas(&r, &t).await, 1);

    queues.set("orders", 40);
    assert_eq!(replicas(&r, &t).await, 2);

    queues.set("orders", 0);
    assert_eq!(replicas(&r, &t).await, 2);
    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(replicas(&r, &t).await, 2);
    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(replicas(&r, &t).await, 1);
}

#[tokio::test(start_paused = true)]
async fn renewed_activity_restarts_cooldown() {
    let queues = Queues::default();
    let r = reconciler(&queues);
    let t = target(0, 10, 60, vec![queue_trigger("orders")]);

    queues.set("orders", 20);
    assert_eq!(replicas(&r, &t).await, 4);

    queues.set("orders", 0);
    assert_eq!(replicas(&r, &t).await, 4);
    tokio::time::advance(Duration::from_secs(45)).await;

    queues.set("orders", 5);
    assert_eq!(replicas(&r, &t).await, 1);

    queues.set("orders", 0);
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(replicas(&r, &t).await, 1);
    tokio::time::advance(Duration::from_secs(59)).await;
    assert_eq!(replicas(&r, &t).await, 1);
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(replicas(&r, &t).await, 0);
}

#[tokio::test(start_paused = true)]
async fn pause_scenario_overrides_and_restores() {
    let queues = Queues::default();
    let r = reconciler(&queues);
    let mut t = target(2, 4, 300, vec![queue_trigger("orders")]);

    assert_eq!(replicas(&r, &t).await, 2);

    t.annotations
        .insert(PAUSED_REPLICAS_ANNOTATION.to_string(), "5".to_string());
    let status = r.reconcile_once(&t).await.unwrap();
    assert_eq!(status.desired_replicas, 5);
    assert_eq!(status.paused_replicas, Some(5));
    assert!(status.has_condition(ConditionKind::Paused));

    // Activity does not move a paused target.
    queues.set("orders", 100);
    assert_eq!(replicas(&r, &t).await, 5);
    queues.set("orders", 0);

    t.annotations.remove(PAUSED_REPLICAS_ANNOTATION);
    let status = r.reconcile_once(&t).await.unwrap();
    assert_eq!(status.desired_replicas, 2);
    assert_eq!(status.paused_replicas, None);
    assert!(!status.has_condition(ConditionKind::Paused));
}

#[tokio::test(start_paused = true)]
async fn outside_pause_counts_stay_in_bounds() {
    let queues = Queues::default();
    let r = reconciler(&queues);
    let t = target(3, 6, 0, vec![queue_trigger("orders")]);

    for backlog in [0, 1, 14, 500, 0, 2] {
        queues.set("orders", backlog);
        let n = replicas(&r, &t).await;
        assert!((3..=6).contains(&n), "backlog {backlog} gave {n}");
    }
}

#[tokio::test(start_paused = true)]
async fn any_active_trigger_activates() {
    let queues = Queues::default();
    let r = reconciler(&queues);
    let t = target(0, 10, 0, vec![queue_trigger("idle"), queue_trigger("busy")]);

    queues.set("busy", 3);
    let status = r.reconcile_once(&t).await.unwrap();
    assert!(status.active);
    assert!(status.has_condition(ConditionKind::Active));
    assert_eq!(status.desired_replicas, 1);
    assert_eq!(status.triggers[0].active, Some(false));
    assert_eq!(status.triggers[1].active, Some(true));
}

#[tokio::test(start_paused = true)]
async fn conflicting_type_selectors_are_configuration_errors() {
    let queues = Queues::default();
    let r = reconciler(&queues);

    let cpu = |metadata: &[(&str, &str)], metric_type: Option<MetricTargetType>| Trigger {
        trigger_type: "cpu".to_string(),
        name: None,
        metadata: metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        auth_ref: None,
        metric_type,
    };

    let both = target(
        1,
        5,
        0,
        vec![cpu(&[("type", "Utilization"), ("value", "50")], Some(MetricTargetType::Utilization))],
    );
    let status = r.reconcile_once(&both).await.unwrap();
    assert!(status.has_condition(ConditionKind::ConfigurationError));
    assert!(status.has_condition(ConditionKind::AllSourcesFailed));

    let neither = target(1, 5, 0, vec![cpu(&[("value", "50")], None)]);
    let status = r.reconcile_once(&neither).await.unwrap();
    assert!(status.has_condition(ConditionKind::ConfigurationError));

    let valid = target(1, 5, 0, vec![cpu(&[("value", "50")], Some(MetricTargetType::Utilization))]);
    let status = r.reconcile_once(&valid).await.unwrap();
    assert!(!status.has_condition(ConditionKind::ConfigurationError));
    assert!(status.active);
}

#[tokio::test(start_paused = true)]
async fn broken_trigger_does_not_block_siblings() {
    let queues = Queues::default();
    let r = reconciler(&queues);
    let mut broken = queue_trigger("orders");
    broken.metadata.remove("queueName");
    let t = target(0, 10, 0, vec![broken, queue_trigger("orders")]);

    queues.set("orders", 12);
    let status = r.reconcile_once(&t).await.unwrap();
    assert_eq!(status.desired_replicas, 3);
    assert!(status.has_condition(ConditionKind::Ready));
    assert!(status.has_condition(ConditionKind::ConfigurationError));
    assert!(!status.has_condition(ConditionKind::AllSourcesFailed));
    assert_eq!(status.metrics, vec![MetricValue::new("s1-queue-orders", 12.0)]);
}

#[tokio::test(start_paused = true)]
async fn metric_outage_holds_count_and_is_reported() {
    let queues = Queues::default();
    let r = reconciler(&queues);
    let t = target(0, 10, 0, vec![queue_trigger("orders")]);

    queues.set("orders", 40);
    assert_eq!(replicas(&r, &t).await, 8);

    queues.set("orders", UNREADABLE);
    let status = r.reconcile_once(&t).await.unwrap();
    assert_eq!(status.desired_replicas, 8);
    assert!(status.active);
    assert!(status.has_condition(ConditionKind::Ready));
    assert!(status.has_condition(ConditionKind::SourceError));
    assert_eq!(status.triggers[0].error, None);
    assert_eq!(status.triggers[0].metric_errors.len(), 1);
    assert!(status.metrics.is_empty());

    queues.set("orders", 10);
    assert_eq!(replicas(&r, &t).await, 2);
}

#[tokio::test(start_paused = true)]
async fn metric_outage_leaves_siblings_untouched() {
    let queues = Queues::default();
    let r = reconciler(&queues);
    let t = target(0, 10, 0, vec![queue_trigger("orders"), queue_trigger("billing")]);

    queues.set("orders", UNREADABLE);
    queues.set("billing", 10);
    let status = r.reconcile_once(&t).await.unwrap();
    assert_eq!(status.triggers[0].metric_errors.len(), 1);
    assert!(status.triggers[1].metric_errors.is_empty());
    assert_eq!(status.triggers[1].active, Some(true));
    assert_eq!(status.metrics, vec![MetricValue::new("s1-queue-billing", 10.0)]);
    assert!(status.has_condition(ConditionKind::SourceError));
    assert!(!status.has_condition(ConditionKind::AllSourcesFailed));
}
