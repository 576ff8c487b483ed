use crate::application::strategies::Strategy;
use crate::application::strategies::pullback::PullbackStrategy;
use crate::domain::errors::StrategyError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub type StrategyFactory = fn() -> Arc<dyn Strategy>;

/// Name → factory map used to resolve the configured strategy at startup.
/// Registration must happen before the application looks its strategy up.
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry preloaded with the built-in strategies.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register("pullback_v1", || Arc::new(PullbackStrategy::new()))
            .expect("built-in registration cannot collide");
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: StrategyFactory,
    ) -> Result<(), StrategyError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(StrategyError::AlreadyRegistered(name));
        }
        info!("Registered strategy: {}", name);
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Registered names, sorted.
    pub fn available(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Instantiate a strategy by name. Unknown names fail with the list of
    /// available strategies.
    pub fn create(&self, name: &str) -> Result<Arc<dyn Strategy>, StrategyError> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(StrategyError::UnknownStrategy {
                name: name.to_string(),
                available: self.available(),
            }),
        }
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
