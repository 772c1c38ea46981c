//! Pause and cooldown policy.
//!
//! Turns an evaluation into the replica count actually published:
//!
//! 1. A valid pause annotation pins the count and resets cooldown.
//! 2. An unparseable annotation is reported and the previous pause state
//!    stays in effect.
//! 3. If every trigger failed, the last published count is held. If only
//!    some metrics failed, the count never drops below the held one.
//! 4. After the last trigger goes inactive, the last active count is held
//!    until the cooldown period has passed since that transition.
//!
//! Everything except an unclamped pause ends up inside `[min, max]`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kedge_core::{PauseState, ScalingTarget, TargetId};

/// Per-target memory carried between polls.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PolicyState {
    effective_pause: Option<u32>,
    /// Set at the active → inactive transition.
    last_active: Option<Instant>,
    was_active: bool,
    /// Count published while active; held through cooldown.
    held_replicas: Option<u32>,
    last_published: Option<u32>,
    /// Last count the scale callback accepted.
    applied: Option<u32>,
}

impl PolicyState {
    pub fn effective_pause(&self) -> Option<u32> {
        self.effective_pause
    }

    pub fn last_published(&self) -> Option<u32> {
        self.last_published
    }

    pub fn cooldown_started(&self) -> Option<Instant> {
        self.last_active
    }

    /// True until `replicas` has been accepted by the workload.
    pub fn needs_apply(&self, replicas: u32) -> bool {
        self.applied != Some(replicas)
    }

    pub fn mark_applied(&mut self, replicas: u32) {
        self.applied = Some(replicas);
    }

    fn reset_cooldown(&mut self) {
        self.last_active = None;
        self.was_active = false;
        self.held_replicas = None;
    }
}

/// What the engine observed this poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Every trigger failed.
    Failed,
    /// `proposed` is the calculator's count before clamping.
    Evaluated { active: bool, proposed: u32 },
    /// Active, but some metrics could not be fetched, so `proposed` may
    /// undercount.
    Degraded { proposed: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    Paused,
    Active,
    CoolingDown,
    Inactive,
    HeldOnFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub replicas: u32,
    /// The annotation as parsed this poll.
    pub pause: PauseState,
    /// The pause actually in effect (may outlive an invalid annotation).
    pub paused_replicas: Option<u32>,
    pub reason: DecisionReason,
    /// Differs from the previously decided count.
    pub changed: bool,
}

/// Stateless decision rules; state lives in [`PolicyState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Policy {
    /// Clamp paused counts into `[min, max]` instead of publishing them
    /// verbatim.
    pub clamp_paused_replicas: bool,
}

impl Policy {
    pub fn new(clamp_paused_replicas: bool) -> Self {
        Self {
            clamp_paused_replicas,
        }
    }

    pub fn decide(
        &self,
        state: &mut PolicyState,
        target: &ScalingTarget,
        observation: Observation,
        now: Instant,
    ) -> PolicyOutcome {
        let pause = PauseState::parse(target.pause_annotation());
        match &pause {
            PauseState::Paused { replicas } => {
                if state.effective_pause != Some(*replicas) {
                    info!(target_id = %target.id(), replicas, "target paused");
                }
                state.effective_pause = Some(*replicas);
            }
            PauseState::Unpaused => {
                if state.effective_pause.take().is_some() {
                    info!(target_id = %target.id(), "target unpaused");
                }
            }
            PauseState::InvalidAnnotation { value } => {
                warn!(
                    target_id = %target.id(),
                    %value,
                    "invalid paused-replicas annotation, keeping previous pause state"
                );
            }
        }

        let (replicas, reason) = match state.effective_pause {
            Some(paused) => {
                state.reset_cooldown();
                let replicas = if self.clamp_paused_replicas {
                    target.clamp(paused)
                } else {
                    paused
                };
                (replicas, DecisionReason::Paused)
            }
            None => self.unpaused(state, target, observation, now),
        };

        let changed = state.last_published != Some(replicas);
        state.last_published = Some(replicas);
        if changed {
            debug!(target_id = %target.id(), replicas, ?reason, "replica count changed");
        }

        PolicyOutcome {
            replicas,
            paused_replicas: state.effective_pause,
            pause,
            reason,
            changed,
        }
    }

    fn unpaused(
        &self,
        state: &mut PolicyState,
        target: &ScalingTarget,
        observation: Observation,
        now: Instant,
    ) -> (u32, DecisionReason) {
        let cooldown = Duration::from_secs(target.cooldown_period_seconds);

        match observation {
            Observation::Failed => {
                let held = state
                    .last_published
                    .map(|r| target.clamp(r))
                    .unwrap_or(target.min_replica_count);
                (held, DecisionReason::HeldOnFailure)
            }
            Observation::Evaluated {
                active: true,
                proposed,
            } => {
                state.was_active = true;
                state.last_active = None;
                let replicas = target.clamp(proposed);
                state.held_replicas = Some(replicas);
                (replicas, DecisionReason::Active)
            }
            Observation::Degraded { proposed } => {
                let floor = state.held_replicas.or(state.last_published).unwrap_or(0);
                state.was_active = true;
                state.last_active = None;
                let measured = target.clamp(proposed);
                let replicas = target.clamp(proposed.max(floor));
                state.held_replicas = Some(replicas);
                let reason = if replicas > measured {
                    DecisionReason::HeldOnFailure
                } else {
                    DecisionReason::Active
                };
                (replicas, reason)
            }
            Observation::Evaluated {
                active: false,
                proposed,
            } => {
                if state.was_active {
                    state.was_active = false;
                    state.last_active = Some(now);
                }
                match (state.last_active, state.held_replicas) {
                    (Some(since), Some(held)) if now.duration_since(since) < cooldown => {
                        (target.clamp(held), DecisionReason::CoolingDown)
                    }
                    _ => {
                        state.reset_cooldown();
                        (target.clamp(proposed), DecisionReason::Inactive)
                    }
                }
            }
        }
    }
}

/// Per-target [`PolicyState`], each behind its own lock so passes for
/// different targets never contend.
#[derive(Default)]
pub struct PolicyStore {
    states: RwLock<HashMap<TargetId, Arc<Mutex<PolicyState>>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state for `target_id`, created on first use.
    pub async fn state(&self, target_id: &str) -> Arc<Mutex<PolicyState>> {
        if let Some(state) = self.states.read().await.get(target_id) {
            return Arc::clone(state);
        }
        let mut states = self.states.write().await;
        Arc::clone(states.entry(target_id.to_string()).or_default())
    }

    pub async fn forget(&self, target_id: &str) -> bool {
        self.states.write().await.remove(target_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}
