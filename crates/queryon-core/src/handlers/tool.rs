// ToolHandler: placeholder for tool/function calling in the chat path

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::handlers::{Handler, HandlerContext};
use crate::types::{IntentType, OrchestratorResult};

/// Schema for a callable tool
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    /// Phrases that pre-classify a query to this tool
    pub trigger_phrases: Vec<String>,
}

/// Registry of available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    pub fn register(&mut self, tool: ToolDefinition) {
        tracing::info!(tool = %tool.name, "ToolRegistry: registered tool");
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.tools
            .iter()
            .map(|t| format!("{}: {}", t.name, t.description))
            .collect()
    }

    /// tool name -> trigger phrases, consumed by the pre-classifier
    pub fn trigger_map(&self) -> HashMap<String, Vec<String>> {
        self.tools
            .iter()
            .filter(|t| !t.trigger_phrases.is_empty())
            .map(|t| (t.name.clone(), t.trigger_phrases.clone()))
            .collect()
    }
}

/// Placeholder handler: surfaces the names of available tools. Tool
/// invocation runs through the admin test endpoint; the classification
/// path's contract is stable.
pub struct ToolHandler {
    registry: std::sync::Arc<ToolRegistry>,
}

impl ToolHandler {
    pub fn new(registry: std::sync::Arc<ToolRegistry>) -> Self {
        ToolHandler { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

#[async_trait]
impl Handler for ToolHandler {
    async fn handle(&self, query: &str, _ctx: &HandlerContext<'_>) -> OrchestratorResult {
        let mut result = OrchestratorResult::new(query, IntentType::Tool)
            .with_answer("Tool desteği henüz aktif değil.");
        result.metadata.extra.insert(
            "available_tools".into(),
            Value::Array(
                self.registry
                    .names()
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn surfaces_available_tool_names() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDefinition {
            name: "check_calendar_availability".into(),
            description: "Check free slots".into(),
            parameters: serde_json::json!({}),
            trigger_phrases: vec!["müsait".into()],
        });
        let handler = ToolHandler::new(std::sync::Arc::new(registry));
        let result = handler
            .handle("bir şey çalıştır", &HandlerContext::default())
            .await;
        assert_eq!(result.intent, IntentType::Tool);
        let tools = result.metadata.extra.get("available_tools").unwrap();
        assert_eq!(tools[0], "check_calendar_availability");
    }
}
