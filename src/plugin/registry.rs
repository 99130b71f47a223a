//! Registry of stage factories.

use super::StageFactory;
use crate::config::StageConfig;
use crate::error::{Error, Result};
use crate::port::{AudioPortRef, VideoPortRef};
use crate::proxy::Stage;
use crate::stages::{PassthroughFactory, ProbeFactory};
use crate::ticket::Ticket;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry for stage factories.
///
/// The registry provides a central place to:
/// - Register and unregister factories
/// - Query available stages
/// - Build stage instances
pub struct StageRegistry {
    /// Factories indexed by identifier.
    factories: RwLock<HashMap<String, Arc<dyn StageFactory>>>,
}

impl StageRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding the built-in stages.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(PassthroughFactory));
        registry.register(Arc::new(ProbeFactory::default()));
        registry
    }

    /// Register a factory, replacing any factory with the same identifier.
    ///
    /// Returns the replaced factory.
    pub fn register(&self, factory: Arc<dyn StageFactory>) -> Option<Arc<dyn StageFactory>> {
        let identifier = factory.identifier().to_string();
        tracing::debug!(stage = %identifier, "registering stage factory");
        let mut factories = self.factories.write().unwrap();
        factories.insert(identifier, factory)
    }

    /// Remove a factory.
    ///
    /// Returns true if the factory was found and removed.
    pub fn unregister(&self, identifier: &str) -> bool {
        let mut factories = self.factories.write().unwrap();
        factories.remove(identifier).is_some()
    }

    /// Check if a factory is registered.
    pub fn has_stage(&self, identifier: &str) -> bool {
        let factories = self.factories.read().unwrap();
        factories.contains_key(identifier)
    }

    /// List registered identifiers, sorted.
    pub fn identifiers(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap();
        let mut identifiers: Vec<String> = factories.keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    /// Description of a registered factory.
    pub fn description(&self, identifier: &str) -> Option<String> {
        let factories = self.factories.read().unwrap();
        factories
            .get(identifier)
            .map(|factory| factory.description().to_string())
    }

    /// Build a stage by identifier.
    pub fn open(
        &self,
        identifier: &str,
        config: StageConfig,
        ticket: Arc<Ticket>,
        audio: Vec<AudioPortRef>,
        video: Vec<VideoPortRef>,
    ) -> Result<Stage> {
        let factory = {
            let factories = self.factories.read().unwrap();
            factories
                .get(identifier)
                .cloned()
                .ok_or_else(|| Error::UnknownStage(identifier.to_string()))?
        };

        factory.open(config, ticket, audio, video)
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.identifiers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestVideoPort;

    #[test]
    fn test_builtin_stages() {
        let registry = StageRegistry::with_builtin();
        assert_eq!(registry.identifiers(), ["passthrough", "probe"]);
        assert!(registry.has_stage("probe"));
        assert!(registry.description("probe").is_some());
    }

    #[test]
    fn test_unknown_stage() {
        let registry = StageRegistry::new();
        let result = registry.open(
            "deinterlace",
            StageConfig::default(),
            Arc::new(Ticket::new()),
            Vec::new(),
            Vec::new(),
        );
        assert!(matches!(result, Err(Error::UnknownStage(name)) if name == "deinterlace"));
    }

    #[test]
    fn test_register_replaces_and_unregister_removes() {
        let registry = StageRegistry::new();
        assert!(registry.register(Arc::new(PassthroughFactory)).is_none());
        assert!(registry.register(Arc::new(PassthroughFactory)).is_some());

        assert!(registry.unregister("passthrough"));
        assert!(!registry.unregister("passthrough"));
        assert!(registry.identifiers().is_empty());
    }

    #[test]
    fn test_open_builds_stage_on_targets() {
        let registry = StageRegistry::with_builtin();
        let output: VideoPortRef = TestVideoPort::new("out");

        let stage = registry
            .open(
                "probe",
                StageConfig::new("probe-1"),
                Arc::new(Ticket::new()),
                Vec::new(),
                vec![output],
            )
            .unwrap();

        assert_eq!(stage.name(), "probe-1");
        assert_eq!(stage.input_names(), ["video in"]);
    }
}
