//! Capability registry: metadata and invoke handles for every capability.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::capabilities::capability::Capability;
use crate::error::RegistryError;
use crate::llm::ToolDefinition;

/// Registry of available capabilities.
pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<String, Arc<dyn Capability>>>,
}

impl CapabilityRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            capabilities: RwLock::new(HashMap::new()),
        }
    }

    /// Register a capability. Duplicate names are rejected.
    pub async fn register(&self, capability: Arc<dyn Capability>) -> Result<(), RegistryError> {
        let name = capability.name().to_string();
        let mut capabilities = self.capabilities.write().await;
        if capabilities.contains_key(&name) {
            tracing::warn!(capability = %name, "Rejected duplicate capability registration");
            return Err(RegistryError::Duplicate { name });
        }
        capabilities.insert(name.clone(), capability);
        tracing::debug!(capability = %name, "Registered capability");
        Ok(())
    }

    /// Re-register a capability, replacing any existing entry with the same name.
    pub async fn replace(&self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        let name = capability.name().to_string();
        let previous = self
            .capabilities
            .write()
            .await
            .insert(name.clone(), capability);
        tracing::info!(capability = %name, replaced = previous.is_some(), "Reloaded capability");
        previous
    }

    /// Swap the whole capability set. On a duplicate the current set is kept.
    pub async fn rebuild(&self, capabilities: Vec<Arc<dyn Capability>>) -> Result<(), RegistryError> {
        let mut next = HashMap::with_capacity(capabilities.len());
        for capability in capabilities {
            let name = capability.name().to_string();
            if next.contains_key(&name) {
                return Err(RegistryError::Duplicate { name });
            }
            next.insert(name, capability);
        }
        let count = next.len();
        *self.capabilities.write().await = next;
        tracing::info!(count, "Rebuilt capability registry");
        Ok(())
    }

    /// Capabilities whose tags intersect `tags`, ordered by name. Empty `tags` returns all.
    pub async fn find_by_tags(&self, tags: &[String]) -> Vec<Arc<dyn Capability>> {
        let capabilities = self.capabilities.read().await;
        let mut found: Vec<Arc<dyn Capability>> = capabilities
            .values()
            .filter(|c| tags.is_empty() || c.tags().iter().any(|t| tags.iter().any(|w| w == t)))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name().cmp(b.name()));
        found
    }

    /// Exact-name lookup.
    pub async fn find_by_name(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.read().await.get(name).cloned()
    }

    /// Check if a capability exists.
    pub async fn has(&self, name: &str) -> bool {
        self.capabilities.read().await.contains_key(name)
    }

    /// All capability names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered capabilities.
    pub async fn count(&self) -> usize {
        self.capabilities.read().await.len()
    }

    /// Tool definitions for LLM function calling.
    pub fn definitions(capabilities: &[Arc<dyn Capability>]) -> Vec<ToolDefinition> {
        capabilities
            .iter()
            .map(|capability| ToolDefinition {
                name: capability.name().to_string(),
                description: capability.description().to_string(),
                parameters: capability.parameters().to_json_schema(),
            })
            .collect()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::capability::{
        Arguments, CapabilityContext, CapabilityOutput, ParameterSchema,
    };
    use crate::error::CapabilityError;
    use async_trait::async_trait;

    struct MockCapability {
        name: &'static str,
        tags: &'static [&'static str],
        reply: &'static str,
    }

    #[async_trait]
    impl Capability for MockCapability {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "A mock capability for testing"
        }
        fn tags(&self) -> &[&str] {
            self.tags
        }
        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::new()
        }
        async fn invoke(
            &self,
            _args: Arguments,
            _ctx: &CapabilityContext,
        ) -> Result<CapabilityOutput, CapabilityError> {
            Ok(CapabilityOutput::text(self.reply))
        }
    }

    fn mock(name: &'static str, tags: &'static [&'static str]) -> Arc<dyn Capability> {
        Arc::new(MockCapability {
            name,
            tags,
            reply: "mock",
        })
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn names(found: Vec<Arc<dyn Capability>>) -> Vec<String> {
        found.iter().map(|c| c.name().to_string()).collect()
    }

    #[tokio::test]
    async fn test_register_and_find() {
        let registry = CapabilityRegistry::new();
        registry.register(mock("weather", &["weather"])).await.unwrap();

        assert!(registry.has("weather").await);
        assert!(registry.find_by_name("weather").await.is_some());
        assert!(registry.find_by_name("Weather").await.is_none());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = CapabilityRegistry::new();
        registry.register(mock("weather", &["weather"])).await.unwrap();
        let err = registry.register(mock("weather", &["other"])).await.unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { name } if name == "weather"));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_count_waits_for_a_writer() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(mock("weather", &["weather"])).await.unwrap();

        let guard = registry.capabilities.write().await;
        let counting = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.count().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!counting.is_finished());
        drop(guard);
        assert_eq!(counting.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_by_tags_filters_disjoint_sets() {
        let registry = CapabilityRegistry::new();
        registry.register(mock("weather", &["weather"])).await.unwrap();
        registry.register(mock("crypto_price", &["money"])).await.unwrap();
        registry.register(mock("add_numbers", &["math", "money"])).await.unwrap();

        let money = names(registry.find_by_tags(&tags(&["money"])).await);
        assert_eq!(money, ["add_numbers", "crypto_price"]);

        let none = registry.find_by_tags(&tags(&["triage"])).await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_empty_tags_returns_all() {
        let registry = CapabilityRegistry::new();
        registry.register(mock("b", &["x"])).await.unwrap();
        registry.register(mock("a", &["y"])).await.unwrap();

        let all = names(registry.find_by_tags(&[]).await);
        assert_eq!(all, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_replace_hot_reloads() {
        let registry = CapabilityRegistry::new();
        registry.register(mock("adder", &["math"])).await.unwrap();
        let previous = registry
            .replace(Arc::new(MockCapability {
                name: "adder",
                tags: &["math"],
                reply: "v2",
            }))
            .await;
        assert!(previous.is_some());

        let ctx = CapabilityContext::new("t", Default::default());
        let output = registry
            .find_by_name("adder")
            .await
            .unwrap()
            .invoke(Arguments::new(), &ctx)
            .await
            .unwrap();
        assert_eq!(output.render().unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_rebuild_keeps_old_set_on_duplicate() {
        let registry = CapabilityRegistry::new();
        registry.register(mock("old", &[])).await.unwrap();

        let result = registry
            .rebuild(vec![mock("new", &[]), mock("new", &[])])
            .await;
        assert!(result.is_err());
        assert_eq!(registry.list().await, ["old"]);

        registry.rebuild(vec![mock("new", &[])]).await.unwrap();
        assert_eq!(registry.list().await, ["new"]);
    }

    #[tokio::test]
    async fn test_definitions() {
        let registry = CapabilityRegistry::new();
        registry.register(mock("my_capability", &[])).await.unwrap();

        let defs = CapabilityRegistry::definitions(&registry.find_by_tags(&[]).await);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "my_capability");
        assert_eq!(defs[0].parameters["type"], "object");
    }
}
