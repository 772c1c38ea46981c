//! Scaler registry: owns live scaler instances across polls.
//!
//! One slot per `(target, trigger index)`. A slot remembers the
//! fingerprint of the trigger config it was built from; a mismatching
//! lookup retires the old instance and builds a fresh one.
//!
//! ```text
//! ScalerRegistry
//!   └── (target_id, index) → Slot
//!       ├── fingerprint
//!       └── OnceCell<Arc<dyn Scaler>>   at most one construction
//! ```
//!
//! Instances are closed only after their slot has been removed and the
//! map lock released, so a slow teardown never stalls other targets.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use kedge_core::TargetId;

use crate::context::PollContext;
use crate::error::{ScalerError, ScalerResult};
use crate::scaler::Scaler;

/// Identifies one scaler instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScalerKey {
    pub target_id: TargetId,
    pub trigger_index: usize,
    pub fingerprint: String,
}

impl ScalerKey {
    pub fn new(target_id: &str, trigger_index: usize, fingerprint: impl Into<String>) -> Self {
        Self {
            target_id: target_id.to_string(),
            trigger_index,
            fingerprint: fingerprint.into(),
        }
    }

    fn slot_id(&self) -> SlotId {
        (self.target_id.clone(), self.trigger_index)
    }
}

type SlotId = (TargetId, usize);

struct Slot {
    fingerprint: String,
    cell: Arc<OnceCell<Arc<dyn Scaler>>>,
}

impl Slot {
    fn new(fingerprint: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            cell: Arc::new(OnceCell::new()),
        }
    }
}

/// Caches scaler instances keyed by target, trigger index and config
/// fingerprint.
pub struct ScalerRegistry {
    slots: RwLock<HashMap<SlotId, Slot>>,
    close_timeout: Duration,
}

impl Default for ScalerRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ScalerRegistry {
    /// Create a registry. `close_timeout` bounds each `Scaler::close`.
    pub fn new(close_timeout: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            close_timeout,
        }
    }

    /// Return the live instance for `key`, building it with `build` if
    /// needed.
    ///
    /// Concurrent callers for the same key share one construction. A
    /// failed construction is not cached; the next call retries.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: &ScalerKey,
        build: F,
    ) -> ScalerResult<Arc<dyn Scaler>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ScalerResult<Arc<dyn Scaler>>>,
    {
        let slot_id = key.slot_id();

        // Fast path: live instance with a matching fingerprint.
        {
            let slots = self.slots.read().await;
            let live = slots
                .get(&slot_id)
                .filter(|slot| slot.fingerprint == key.fingerprint)
                .and_then(|slot| slot.cell.get());
            if let Some(scaler) = live {
                return Ok(Arc::clone(scaler));
            }
        }

        let (cell, stale) = {
            let mut slots = self.slots.write().await;
            match slots.get(&slot_id) {
                Some(slot) if slot.fingerprint == key.fingerprint => {
                    (Arc::clone(&slot.cell), None)
                }
                _ => {
                    let slot = Slot::new(&key.fingerprint);
                    let cell = Arc::clone(&slot.cell);
                    let stale = slots.insert(slot_id.clone(), slot);
                    (cell, stale)
                }
            }
        };

        if let Some(stale) = stale {
            info!(
                target_id = %key.target_id,
                trigger = key.trigger_index,
                "trigger config changed, retiring scaler"
            );
            self.close_slot(&key.target_id, key.trigger_index, stale).await;
        }

        let mut built_here = false;
        let scaler = cell
            .get_or_try_init(|| {
                built_here = true;
                build()
            })
            .await
            .map(Arc::clone)?;

        if built_here {
            debug!(
                target_id = %key.target_id,
                trigger = key.trigger_index,
                "scaler constructed"
            );
            // The slot may have been replaced or evicted while building.
            let still_registered = {
                let slots = self.slots.read().await;
                slots
                    .get(&slot_id)
                    .is_some_and(|slot| Arc::ptr_eq(&slot.cell, &cell))
            };
            if !still_registered {
                self.close_instance(&key.target_id, key.trigger_index, &scaler)
                    .await;
                return Err(ScalerError::Superseded);
            }
        }

        Ok(scaler)
    }

    /// Close and remove the instance for `key`. A slot holding a
    /// different fingerprint is left alone. Returns true if removed.
    pub async fn evict(&self, key: &ScalerKey) -> bool {
        let removed = {
            let mut slots = self.slots.write().await;
            let slot_id = key.slot_id();
            match slots.get(&slot_id) {
                Some(slot) if slot.fingerprint == key.fingerprint => slots.remove(&slot_id),
                _ => None,
            }
        };

        match removed {
            Some(slot) => {
                self.close_slot(&key.target_id, key.trigger_index, slot).await;
                true
            }
            None => false,
        }
    }

    /// Close and remove every instance belonging to `target_id`.
    pub async fn evict_target(&self, target_id: &str) -> usize {
        self.evict_where(target_id, |_| true).await
    }

    /// Close and remove instances for trigger indexes `>= trigger_count`,
    /// i.e. triggers deleted from the spec.
    pub async fn retain_triggers(&self, target_id: &str, trigger_count: usize) -> usize {
        self.evict_where(target_id, |index| index >= trigger_count)
            .await
    }

    /// Close everything (daemon shutdown).
    pub async fn close_all(&self) {
        let drained: Vec<(SlotId, Slot)> = {
            let mut slots = self.slots.write().await;
            slots.drain().collect()
        };
        let count = drained.len();
        for ((target_id, index), slot) in drained {
            self.close_slot(&target_id, index, slot).await;
        }
        info!(count, "all scalers closed");
    }

    /// Number of registered slots.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    async fn evict_where(&self, target_id: &str, pred: impl Fn(usize) -> bool) -> usize {
        let removed: Vec<(usize, Slot)> = {
            let mut slots = self.slots.write().await;
            let ids: Vec<SlotId> = slots
                .keys()
                .filter(|(t, index)| t == target_id && pred(*index))
                .cloned()
                .collect();
            ids.into_iter()
                .filter_map(|id| slots.remove(&id).map(|slot| (id.1, slot)))
                .collect()
        };

        let count = removed.len();
        for (index, slot) in removed {
            self.close_slot(target_id, index, slot).await;
        }
        if count > 0 {
            debug!(%target_id, count, "scalers evicted");
        }
        count
    }

    async fn close_slot(&self, target_id: &str, index: usize, slot: Slot) {
        if let Some(scaler) = slot.cell.get() {
            self.close_instance(target_id, index, scaler).await;
        }
    }

    async fn close_instance(&self, target_id: &str, index: usize, scaler: &Arc<dyn Scaler>) {
        let ctx = PollContext::new(self.close_timeout);
        if let Err(e) = ctx.run(scaler.close(&ctx)).await {
            warn!(%target_id, trigger = index, error = %e, "failed to close scaler");
        }
    }
}
