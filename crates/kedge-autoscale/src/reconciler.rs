//! Reconciler: one background loop per scaling target.
//!
//! Each loop polls its target every `pollingIntervalSeconds`:
//!
//! ```text
//! engine.evaluate ─▶ calculator ─▶ policy.decide ─▶ put_status
//!                                                └▶ scale callback
//! ```
//!
//! Loops are started, replaced and stopped through [`Reconciler::apply`]
//! and [`Reconciler::remove`], or in bulk by
//! [`Reconciler::sync_from_store`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kedge_core::{PauseState, ScalingTarget, TargetId};
use kedge_state::{Condition, ConditionKind, StateStore, TargetStatus, TriggerHealth};

use crate::calculator::{ProportionalCalculator, ReplicaCalculator};
use crate::engine::{Engine, Evaluation};
use crate::policy::{Observation, Policy, PolicyOutcome, PolicyStore};

/// Callback for applying a replica count to the workload.
///
/// Called with (target_id, replicas) whenever the published count differs
/// from the last one it accepted. A failed call is repeated next pass.
pub type ScaleCallback = Arc<dyn Fn(&str, u32) -> ScaleFuture + Send + Sync>;

pub type ScaleFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
>;

/// Everything one reconcile pass needs. Cloned into each loop task.
#[derive(Clone)]
struct Pass {
    store: StateStore,
    engine: Arc<Engine>,
    policy: Policy,
    policies: Arc<PolicyStore>,
    calculator: Arc<dyn ReplicaCalculator>,
    scale_fn: Option<ScaleCallback>,
}

/// Per-target loop state.
struct LoopSlot {
    generation: u64,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl LoopSlot {
    /// Signal, cancel and abort the loop, then wait for the task to end.
    async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.cancel.cancel();
        self.handle.abort();
        let _ = self.handle.await;
    }
}

/// Drives every stored scaling target.
pub struct Reconciler {
    pass: Pass,
    /// Running loops: target_id → slot.
    loops: Arc<RwLock<HashMap<TargetId, LoopSlot>>>,
}

impl Reconciler {
    pub fn new(store: StateStore, engine: Arc<Engine>, policy: Policy) -> Self {
        Self {
            pass: Pass {
                store,
                engine,
                policy,
                policies: Arc::new(PolicyStore::new()),
                calculator: Arc::new(ProportionalCalculator),
                scale_fn: None,
            },
            loops: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Set the callback used to apply replica counts.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.pass.scale_fn = Some(f);
        self
    }

    pub fn with_calculator(mut self, calculator: Arc<dyn ReplicaCalculator>) -> Self {
        self.pass.calculator = calculator;
        self
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.pass.engine
    }

    /// Start (or restart) the loop for `target`. The first pass runs
    /// immediately.
    pub async fn apply(&self, target: ScalingTarget) -> anyhow::Result<()> {
        target.validate()?;
        let target_id = target.id();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let generation = target.generation;
        let interval = Duration::from_secs(target.polling_interval_seconds);

        let mut loops = self.loops.write().await;
        // The old loop must be gone before trimming, or an in-flight pass
        // could rebuild a scaler for a removed trigger.
        if let Some(old) = loops.remove(&target_id) {
            old.stop().await;
        }
        self.pass
            .engine
            .registry()
            .retain_triggers(&target_id, target.triggers.len())
            .await;

        let pass = self.pass.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run_target_loop(pass, target, loop_cancel, shutdown_rx).await;
        });
        loops.insert(
            target_id.clone(),
            LoopSlot {
                generation,
                handle,
                shutdown_tx,
                cancel,
            },
        );
        drop(loops);

        info!(%target_id, generation, interval_secs = interval.as_secs(), "reconcile loop started");
        Ok(())
    }

    /// Stop the loop for `target_id` and release its scalers and policy
    /// state. Returns false if nothing was running.
    pub async fn remove(&self, target_id: &str) -> bool {
        let slot = self.loops.write().await.remove(target_id);
        let running = slot.is_some();
        if let Some(slot) = slot {
            slot.stop().await;
        }

        let evicted = self.pass.engine.registry().evict_target(target_id).await;
        self.pass.policies.forget(target_id).await;

        if running || evicted > 0 {
            info!(%target_id, evicted, "reconcile loop stopped");
        }
        running
    }

    /// Stop every loop and close every scaler (graceful shutdown).
    pub async fn stop_all(&self) {
        let drained: Vec<(TargetId, LoopSlot)> = self.loops.write().await.drain().collect();
        for (target_id, slot) in drained {
            slot.stop().await;
            debug!(%target_id, "reconcile loop stopped");
        }
        self.pass.engine.registry().close_all().await;
        info!("all reconcile loops stopped");
    }

    pub async fn is_running(&self, target_id: &str) -> bool {
        self.loops.read().await.contains_key(target_id)
    }

    pub async fn running_targets(&self) -> Vec<TargetId> {
        let mut ids: Vec<TargetId> = self.loops.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run a single pass for `target` on the caller's task.
    pub async fn reconcile_once(&self, target: &ScalingTarget) -> anyhow::Result<TargetStatus> {
        self.pass.run(target, &CancellationToken::new()).await
    }

    /// Align running loops with the stored specs: start missing ones,
    /// restart those whose generation moved, stop deleted ones.
    pub async fn sync_from_store(&self) -> anyhow::Result<(usize, usize)> {
        let targets = self.pass.store.list_targets()?;
        let running: HashMap<TargetId, u64> = self
            .loops
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.generation))
            .collect();

        let mut started = 0;
        let mut stored = HashSet::new();
        for target in targets {
            let target_id = target.id();
            stored.insert(target_id.clone());
            if running.get(&target_id) == Some(&target.generation) {
                continue;
            }
            match self.apply(target).await {
                Ok(()) => started += 1,
                Err(e) => warn!(%target_id, error = %e, "skipping invalid scaling target"),
            }
        }

        let mut stopped = 0;
        for target_id in running.keys().filter(|id| !stored.contains(*id)) {
            if self.remove(target_id).await {
                stopped += 1;
            }
        }

        if started > 0 || stopped > 0 {
            info!(started, stopped, "reconcile loops synced");
        }
        Ok((started, stopped))
    }

    /// Periodically run [`Reconciler::sync_from_store`] until shutdown.
    pub async fn run_sync(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "target sync started");

        loop {
            if let Err(e) = self.sync_from_store().await {
                error!(error = %e, "target sync failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("target sync shutting down");
                    break;
                }
            }
        }
    }
}

async fn run_target_loop(
    pass: Pass,
    target: ScalingTarget,
    cancel: CancellationToken,
    mut shutdown: watch::Receiver<bool>,
) {
    let target_id = target.id();
    let interval = Duration::from_secs(target.polling_interval_seconds);
    debug!(%target_id, "reconcile loop starting");

    loop {
        if let Err(e) = pass.run(&target, &cancel).await {
            error!(%target_id, error = %e, "reconcile pass failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                debug!(%target_id, "reconcile loop shutting down");
                break;
            }
        }
    }
}

impl Pass {
    async fn run(
        &self,
        target: &ScalingTarget,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TargetStatus> {
        let target_id = target.id();
        let evaluation = self.engine.evaluate(target, cancel).await;

        let observation = if evaluation.all_failed() {
            Observation::Failed
        } else if evaluation.is_active() && evaluation.metrics_incomplete() {
            Observation::Degraded {
                proposed: self.calculator.desired_replicas(&evaluation),
            }
        } else {
            Observation::Evaluated {
                active: evaluation.is_active(),
                proposed: self.calculator.desired_replicas(&evaluation),
            }
        };

        // Held through publishing so a count only counts as applied once
        // the status is stored and the callback accepted it.
        let slot = self.policies.state(&target_id).await;
        let mut state = slot.lock().await;
        let outcome = self
            .policy
            .decide(&mut state, target, observation, Instant::now());

        let previous = self.store.get_status(&target_id)?;
        let status = build_status(target, &evaluation, &outcome, previous.as_ref());
        self.store.put_status(&status)?;

        match &self.scale_fn {
            Some(scale_fn) if state.needs_apply(outcome.replicas) => {
                match scale_fn(&target_id, outcome.replicas).await {
                    Ok(()) => state.mark_applied(outcome.replicas),
                    Err(e) => warn!(
                        %target_id,
                        replicas = outcome.replicas,
                        error = %e,
                        "scaling action failed, retrying next pass"
                    ),
                }
            }
            _ => {}
        }
        drop(state);

        debug!(
            %target_id,
            replicas = outcome.replicas,
            active = status.active,
            reason = ?outcome.reason,
            "reconcile pass complete"
        );
        Ok(status)
    }
}

fn build_status(
    target: &ScalingTarget,
    evaluation: &Evaluation,
    outcome: &PolicyOutcome,
    previous: Option<&TargetStatus>,
) -> TargetStatus {
    let now = epoch_secs();
    let all_failed = evaluation.all_failed();
    let active = if all_failed {
        previous.is_some_and(|s| s.active)
    } else {
        evaluation.is_active()
    };
    let last_active_at = if active && !all_failed {
        Some(now)
    } else {
        previous.and_then(|s| s.last_active_at)
    };

    let failures = evaluation.failures();
    let triggers = evaluation
        .outcomes
        .iter()
        .map(|o| TriggerHealth {
            index: o.index,
            trigger_type: o.trigger_type.clone(),
            active: o.result.as_ref().ok().map(|r| r.active),
            error: o.result.as_ref().err().map(|e| e.to_string()),
            metric_errors: o
                .result
                .as_ref()
                .map(|r| {
                    r.metric_errors
                        .iter()
                        .map(|f| format!("{}: {}", f.metric, f.message))
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    let mut conditions = vec![
        Condition::new(
            ConditionKind::Ready,
            !all_failed,
            if all_failed { "holding last replica count" } else { "" },
        ),
        Condition::new(ConditionKind::Active, active, ""),
    ];
    if let Some(replicas) = outcome.paused_replicas {
        conditions.push(Condition::new(
            ConditionKind::Paused,
            true,
            format!("paused at {replicas} replicas"),
        ));
    }
    if let PauseState::InvalidAnnotation { value } = &outcome.pause {
        conditions.push(Condition::new(
            ConditionKind::InvalidPauseAnnotation,
            true,
            format!("cannot parse {value:?} as a replica count"),
        ));
    }
    let describe = |configuration: bool| -> Vec<String> {
        failures
            .iter()
            .filter(|f| f.configuration == configuration)
            .map(|f| format!("trigger {} ({}): {}", f.index, f.trigger_type, f.message))
            .collect()
    };
    let config_errors = describe(true);
    if !config_errors.is_empty() {
        conditions.push(Condition::new(
            ConditionKind::ConfigurationError,
            true,
            config_errors.join("; "),
        ));
    }
    let mut source_errors = describe(false);
    source_errors.extend(
        evaluation
            .metric_failures()
            .map(|(index, f)| format!("trigger {index} metric {}: {}", f.metric, f.message)),
    );
    if !source_errors.is_empty() {
        conditions.push(Condition::new(
            ConditionKind::SourceError,
            true,
            source_errors.join("; "),
        ));
    }
    if all_failed {
        conditions.push(Condition::new(
            ConditionKind::AllSourcesFailed,
            true,
            format!("{} of {} triggers failed", failures.len(), evaluation.outcomes.len()),
        ));
    }

    TargetStatus {
        target_id: target.id(),
        generation: target.generation,
        active,
        desired_replicas: outcome.replicas,
        paused_replicas: outcome.paused_replicas,
        metrics: evaluation
            .reports()
            .flat_map(|r| r.metrics.iter().cloned())
            .collect(),
        triggers,
        conditions,
        last_active_at,
        updated_at: now,
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
