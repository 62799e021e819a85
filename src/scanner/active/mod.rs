//! Active scan plugins
//!
//! The registry holds one prototype per plugin id. Every host run gets fresh
//! instances, filtered by the scan policy.

mod reflection;

use std::collections::BTreeMap;

use super::param_plugin::{ParamPlugin, ParamScan};
use super::plugin::{Plugin, PluginInfo};
use super::policies::ScanPolicy;

pub use reflection::ParameterReflection;

/// Registered plugin prototypes keyed by id
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<u32, Box<dyn Plugin>>,
}

impl Clone for PluginRegistry {
    fn clone(&self) -> Self {
        Self {
            plugins: self
                .plugins
                .iter()
                .map(|(id, p)| (*id, p.clone_box()))
                .collect(),
        }
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in plugins
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_param(ParameterReflection::default());
        registry
    }

    /// Add a plugin, replacing any with the same id
    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        let id = plugin.id();
        if let Some(old) = self.plugins.insert(id, plugin) {
            tracing::warn!(plugin_id = id, replaced = old.name(), "Duplicate plugin id, replacing");
        }
    }

    pub fn register_param<P: ParamPlugin>(&mut self, plugin: P) {
        self.register(Box::new(ParamScan::new(plugin)));
    }

    pub fn ids(&self) -> Vec<u32> {
        self.plugins.keys().copied().collect()
    }

    pub fn get(&self, id: u32) -> Option<&dyn Plugin> {
        self.plugins.get(&id).map(|p| p.as_ref())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Fresh instances of every plugin the policy enables
    pub fn instantiate(&self, policy: &ScanPolicy) -> Vec<Box<dyn Plugin>> {
        self.plugins
            .values()
            .filter(|p| policy.is_enabled(p.id()))
            .map(|p| p.clone_box())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::policies::AlertThreshold;

    #[test]
    fn test_builtin_registry() {
        let registry = PluginRegistry::with_builtin();
        assert_eq!(registry.ids(), vec![ParameterReflection::ID]);
        assert_eq!(
            registry.get(ParameterReflection::ID).map(|p| p.name().to_string()),
            Some("Parameter Reflection".to_string())
        );
    }

    #[test]
    fn test_instantiate_follows_policy() {
        let registry = PluginRegistry::with_builtin();
        let mut policy = ScanPolicy::standard();
        assert_eq!(registry.instantiate(&policy).len(), 1);

        policy.set_threshold(ParameterReflection::ID, AlertThreshold::Off);
        assert!(registry.instantiate(&policy).is_empty());

        let mut policy = ScanPolicy::standard();
        policy.disable_plugin(ParameterReflection::ID);
        assert!(registry.instantiate(&policy).is_empty());
    }

    #[test]
    fn test_duplicate_id_replaces() {
        let mut registry = PluginRegistry::with_builtin();
        registry.register_param(ParameterReflection::default());
        assert_eq!(registry.len(), 1);
        assert!(!registry.clone().is_empty());
    }
}
