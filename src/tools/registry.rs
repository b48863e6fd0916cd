//! Tool registry
//!
//! Process-scoped name-to-tool mapping. Registration happens at startup;
//! dispatch is concurrent. The internal lock protects the map only and is
//! never held while a tool executes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::{Tool, ToolArgs, ToolDefinition, ToolError};

/// Thread-safe registry of tools keyed by name
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool by name. Last registration wins.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(%name, "register: adding tool");
        self.write_lock().insert(name, tool);
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.read_lock().get(name).cloned()
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.read_lock().contains_key(name)
    }

    /// Look up and dispatch a tool by name
    ///
    /// The lock is released before the tool runs.
    pub async fn execute(&self, name: &str, args: &ToolArgs) -> Result<String, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::UnknownTool { name: name.to_string() })?;
        debug!(%name, "execute: dispatching");
        tool.execute(args).await
    }

    /// Snapshot of registered tools, sorted by name
    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self.read_lock().values().cloned().collect();
        tools.sort_by_key(|t| t.name());
        tools
    }

    /// Snapshot of tool descriptors, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list()
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    // Poisoning only happens if a panic occurred while holding the lock;
    // the map is still structurally valid, so recover rather than propagate.
    fn read_lock(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Tool>>> {
        match self.tools.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Tool>>> {
        match self.tools.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool {
        name: &'static str,
        reply: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> String {
            format!("replies with {}", self.reply)
        }

        fn parameters(&self) -> serde_json::Value {
            json!({ "type": "object", "properties": {}, "required": [] })
        }

        async fn execute(&self, _args: &ToolArgs) -> Result<String, ToolError> {
            Ok(self.reply.to_string())
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("anything").is_none());
        assert!(registry.definitions().is_empty());
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { name: "clock", reply: "12:00 PM" }));

        assert!(registry.contains("clock"));
        let output = registry.execute("clock", &ToolArgs::new()).await.unwrap();
        assert_eq!(output, "12:00 PM");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("nonexistent_tool", &ToolArgs::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { name } if name == "nonexistent_tool"));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { name: "t", reply: "first" }));
        registry.register(Arc::new(EchoTool { name: "t", reply: "second" }));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.execute("t", &ToolArgs::new()).await.unwrap(), "second");
    }

    #[test]
    fn test_definitions_sorted_by_name() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { name: "zeta", reply: "z" }));
        registry.register(Arc::new(EchoTool { name: "alpha", reply: "a" }));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "zeta");
        assert!(defs[0].parameters.is_object());
    }
}
