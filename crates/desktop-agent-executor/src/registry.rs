//! Tool dispatch by name.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use desktop_agent_core::{ScopedFolderSet, ToolError, ToolExecutor, ToolRequest, ToolResult};
use serde_json::Value;

/// A single named tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: &Value, scope: &ScopedFolderSet) -> ToolResult;
}

/// Maps tool names to handlers. Unknown names fail with
/// [`ToolError::UnknownTool`].
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous one.
    #[must_use]
    pub fn with_tool(mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(name, handler);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(tool = %name, "tool handler replaced");
        }
    }

    /// Registered tool names, sorted.
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, request: &ToolRequest, scope: &ScopedFolderSet) -> ToolResult {
        match self.handlers.get(&request.tool) {
            Some(handler) => handler.handle(&request.params, scope).await,
            None => Err(ToolError::UnknownTool(request.tool.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use desktop_agent_core::ToolOutput;
    use serde_json::json;

    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn handle(&self, params: &Value, _scope: &ScopedFolderSet) -> ToolResult {
            Ok(ToolOutput::json(params.clone()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_name() {
        let registry = ToolRegistry::new().with_tool("echo", Arc::new(Echo));
        let request = ToolRequest::new("r1", "echo", json!({"x": 1}));
        let output = registry.execute(&request, &ScopedFolderSet::new()).await;
        assert_eq!(output, Ok(ToolOutput::json(json!({"x": 1}))));
        assert_eq!(registry.tool_names().collect::<Vec<_>>(), ["echo"]);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let request = ToolRequest::new("r1", "format_disk", json!({}));
        let output = registry.execute(&request, &ScopedFolderSet::new()).await;
        assert_eq!(output, Err(ToolError::UnknownTool("format_disk".to_string())));
    }
}
