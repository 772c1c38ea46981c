//! Resolution of trigger `authRef`s into credential parameters.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use kedge_core::AuthRef;

use crate::error::{ScalerError, ScalerResult};

/// Looks up credential material for a trigger's `authRef`.
#[async_trait]
pub trait AuthResolver: Send + Sync {
    async fn resolve(
        &self,
        namespace: &str,
        auth_ref: &AuthRef,
    ) -> ScalerResult<BTreeMap<String, String>>;
}

/// Resolver backed by the `[auth.<name>]` tables in the daemon config.
///
/// Names are looked up as `<namespace>/<name>` first, then as a bare
/// `<name>` shared by every namespace.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthResolver {
    entries: HashMap<String, BTreeMap<String, String>>,
}

impl StaticAuthResolver {
    pub fn new(entries: HashMap<String, BTreeMap<String, String>>) -> Self {
        Self { entries }
    }

    pub fn insert(&mut self, name: &str, params: BTreeMap<String, String>) {
        self.entries.insert(name.to_string(), params);
    }
}

#[async_trait]
impl AuthResolver for StaticAuthResolver {
    async fn resolve(
        &self,
        namespace: &str,
        auth_ref: &AuthRef,
    ) -> ScalerResult<BTreeMap<String, String>> {
        self.entries
            .get(&format!("{namespace}/{}", auth_ref.name))
            .or_else(|| self.entries.get(&auth_ref.name))
            .cloned()
            .ok_or_else(|| ScalerError::AuthNotFound(auth_ref.name.clone()))
    }
}
