//! StateStore: redb-backed persistence for scaling targets and their
//! published statuses.
//!
//! Values are JSON-serialized into redb's `&[u8]` columns. The store
//! supports both on-disk and in-memory backends (the latter for tests).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use kedge_core::ScalingTarget;

use crate::error::StateResult;
use crate::tables::{STATUSES, TARGETS};
use crate::types::TargetStatus;

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write()?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TARGETS)?;
        txn.open_table(STATUSES)?;
        txn.commit()?;
        Ok(())
    }

    // ── Generic record helpers ─────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value)?;
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(table)?;
            t.insert(key, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(table)?;
        match t.get(key)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(table)?;
        let mut results = Vec::new();
        for entry in t.iter()? {
            let (_, value) = entry?;
            results.push(serde_json::from_slice(value.value())?);
        }
        Ok(results)
    }

    fn remove(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut t = txn.open_table(table)?;
            existed = t.remove(key)?.is_some();
        }
        txn.commit()?;
        Ok(existed)
    }

    // ── Targets ────────────────────────────────────────────────────

    /// Validate and store a target spec.
    ///
    /// The generation is bumped whenever the stored spec changes, so the
    /// reconciler can tell an edit from a no-op re-apply. Returns the
    /// stored spec.
    pub fn put_target(&self, spec: &ScalingTarget) -> StateResult<ScalingTarget> {
        spec.validate()?;
        let key = spec.id();
        let previous: Option<ScalingTarget> = self.get(TARGETS, &key)?;

        let mut stored = spec.clone();
        stored.generation = match previous {
            Some(prev) => {
                let mut unchanged = prev.clone();
                unchanged.generation = stored.generation;
                if unchanged == stored {
                    prev.generation
                } else {
                    prev.generation + 1
                }
            }
            None => 1,
        };

        self.put(TARGETS, &key, &stored)?;
        debug!(%key, generation = stored.generation, "target stored");
        Ok(stored)
    }

    /// Get a target by its `{namespace}/{name}` key.
    pub fn get_target(&self, key: &str) -> StateResult<Option<ScalingTarget>> {
        self.get(TARGETS, key)
    }

    /// List all targets.
    pub fn list_targets(&self) -> StateResult<Vec<ScalingTarget>> {
        self.list(TARGETS)
    }

    /// Delete a target and its status. Returns true if the target existed.
    pub fn delete_target(&self, key: &str) -> StateResult<bool> {
        let existed = self.remove(TARGETS, key)?;
        self.remove(STATUSES, key)?;
        debug!(%key, existed, "target deleted");
        Ok(existed)
    }

    // ── Statuses ───────────────────────────────────────────────────

    /// Insert or replace the published status for a target.
    pub fn put_status(&self, status: &TargetStatus) -> StateResult<()> {
        self.put(STATUSES, &status.target_id, status)
    }

    pub fn get_status(&self, key: &str) -> StateResult<Option<TargetStatus>> {
        self.get(STATUSES, key)
    }

    pub fn list_statuses(&self) -> StateResult<Vec<TargetStatus>> {
        self.list(STATUSES)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use kedge_core::{MetricTargetType, MetricValue, Trigger, WorkloadRef};

    use super::*;
    use crate::types::{Condition, ConditionKind};

    fn test_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn test_target(ns: &str, name: &str) -> ScalingTarget {
        ScalingTarget {
            namespace: ns.to_string(),
            name: name.to_string(),
            scale_target_ref: WorkloadRef {
                kind: "Deployment".to_string(),
                name: format!("{name}-worker"),
            },
            min_replica_count: 1,
            max_replica_count: 3,
            polling_interval_seconds: 5,
            cooldown_period_seconds: 10,
            triggers: vec![Trigger {
                trigger_type: "cpu".to_string(),
                name: None,
                metadata: BTreeMap::from([("value".to_string(), "60".to_string())]),
                auth_ref: None,
                metric_type: Some(MetricTargetType::Utilization),
            }],
            annotations: BTreeMap::new(),
            generation: 0,
        }
    }

    fn test_status(id: &str) -> TargetStatus {
        TargetStatus {
            target_id: id.to_string(),
            generation: 1,
            active: true,
            desired_replicas: 2,
            paused_replicas: None,
            metrics: vec![MetricValue::new("s0-queue", 12.0)],
            triggers: Vec::new(),
            conditions: vec![Condition::new(ConditionKind::Ready, true, "")],
            last_active_at: Some(1000),
            updated_at: 1000,
        }
    }

    #[test]
    fn put_and_get_target() {
        let store = test_store();
        let stored = store.put_target(&test_target("default", "orders")).unwrap();
        assert_eq!(stored.generation, 1);

        let got = store.get_target("default/orders").unwrap().unwrap();
        assert_eq!(got, stored);
    }

    #[test]
    fn generation_bumps_only_on_change() {
        let store = test_store();
        let spec = test_target("default", "orders");
        store.put_target(&spec).unwrap();

        // Re-applying the same spec keeps the generation.
        assert_eq!(store.put_target(&spec).unwrap().generation, 1);

        let mut changed = spec.clone();
        changed.max_replica_count = 10;
        assert_eq!(store.put_target(&changed).unwrap().generation, 2);
    }

    #[test]
    fn invalid_target_is_rejected() {
        let store = test_store();
        let mut spec = test_target("default", "orders");
        spec.min_replica_count = 5;
        assert!(store.put_target(&spec).is_err());
        assert!(store.get_target("default/orders").unwrap().is_none());
    }

    #[test]
    fn list_targets() {
        let store = test_store();
        store.put_target(&test_target("default", "a")).unwrap();
        store.put_target(&test_target("default", "b")).unwrap();
        store.put_target(&test_target("other", "c")).unwrap();
        assert_eq!(store.list_targets().unwrap().len(), 3);
    }

    #[test]
    fn delete_target_removes_status() {
        let store = test_store();
        store.put_target(&test_target("default", "orders")).unwrap();
        store.put_status(&test_status("default/orders")).unwrap();

        assert!(store.delete_target("default/orders").unwrap());
        assert!(store.get_target("default/orders").unwrap().is_none());
        assert!(store.get_status("default/orders").unwrap().is_none());
        assert!(!store.delete_target("default/orders").unwrap());
    }

    #[test]
    fn put_and_list_statuses() {
        let store = test_store();
        store.put_status(&test_status("default/a")).unwrap();
        store.put_status(&test_status("default/b")).unwrap();

        let status = store.get_status("default/a").unwrap().unwrap();
        assert!(status.has_condition(ConditionKind::Ready));
        assert!(!status.has_condition(ConditionKind::Paused));
        assert_eq!(store.list_statuses().unwrap().len(), 2);
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kedge.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store.put_target(&test_target("default", "orders")).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert!(store.get_target("default/orders").unwrap().is_some());
    }
}
