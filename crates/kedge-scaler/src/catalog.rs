//! Trigger type → constructor mapping.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::ScalerConfig;
use crate::error::{ScalerError, ScalerResult};
use crate::resource::{self, ResourceName};
use crate::scaler::Scaler;

type BuildFuture = Pin<Box<dyn Future<Output = ScalerResult<Arc<dyn Scaler>>> + Send>>;

/// A constructor for one trigger type.
pub type ScalerBuilder = Arc<dyn Fn(ScalerConfig) -> BuildFuture + Send + Sync>;

/// Trigger types that ship with Kedge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTrigger {
    Cpu,
    Memory,
}

impl BuiltinTrigger {
    pub const ALL: [BuiltinTrigger; 2] = [BuiltinTrigger::Cpu, BuiltinTrigger::Memory];

    pub fn type_id(&self) -> &'static str {
        match self {
            BuiltinTrigger::Cpu => "cpu",
            BuiltinTrigger::Memory => "memory",
        }
    }

    fn builder(self) -> ScalerBuilder {
        match self {
            BuiltinTrigger::Cpu => {
                Arc::new(|config: ScalerConfig| {
                    Box::pin(resource::build(ResourceName::Cpu, config)) as BuildFuture
                })
            }
            BuiltinTrigger::Memory => {
                Arc::new(|config: ScalerConfig| {
                    Box::pin(resource::build(ResourceName::Memory, config)) as BuildFuture
                })
            }
        }
    }
}

/// Maps trigger type identifiers to constructors. Cheap to clone.
#[derive(Clone, Default)]
pub struct ScalerCatalog {
    builders: HashMap<String, ScalerBuilder>,
}

impl ScalerCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog with every [`BuiltinTrigger`] registered.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for trigger in BuiltinTrigger::ALL {
            catalog
                .builders
                .insert(trigger.type_id().to_string(), trigger.builder());
        }
        catalog
    }

    /// Register (or replace) the constructor for `trigger_type`.
    pub fn register<F, Fut>(&mut self, trigger_type: &str, build: F)
    where
        F: Fn(ScalerConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ScalerResult<Arc<dyn Scaler>>> + Send + 'static,
    {
        let builder: ScalerBuilder =
            Arc::new(move |config: ScalerConfig| Box::pin(build(config)) as BuildFuture);
        self.builders.insert(trigger_type.to_string(), builder);
    }

    /// Builder-style [`ScalerCatalog::register`].
    pub fn with<F, Fut>(mut self, trigger_type: &str, build: F) -> Self
    where
        F: Fn(ScalerConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ScalerResult<Arc<dyn Scaler>>> + Send + 'static,
    {
        self.register(trigger_type, build);
        self
    }

    pub fn contains(&self, trigger_type: &str) -> bool {
        self.builders.contains_key(trigger_type)
    }

    pub fn trigger_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Construct a scaler. Unknown types are a configuration error.
    pub async fn build(&self, config: ScalerConfig) -> ScalerResult<Arc<dyn Scaler>> {
        let builder = self
            .builders
            .get(&config.trigger_type)
            .cloned()
            .ok_or_else(|| ScalerError::UnknownTriggerType(config.trigger_type.clone()))?;
        builder(config).await
    }
}

impl fmt::Debug for ScalerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalerCatalog")
            .field("trigger_types", &self.trigger_types())
            .finish()
    }
}
