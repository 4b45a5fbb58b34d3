//! Tool Registry: tools keyed by name, dispatched by tool use.

use std::collections::HashMap;
use std::sync::Arc;

use duplex_core::types::{ToolResult, ToolSpec, ToolUse};
use serde_json::Value;
use tracing::{info, warn};

use super::base::Tool;

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

/// Stores tools keyed by name and dispatches calls.
///
/// Owns `Arc<dyn Tool>` so tools can be shared across tasks.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Specs for every registered tool, sent on each (re)connect.
    pub fn get_all_tool_specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.to_spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Execute a tool use and wrap the outcome as a [`ToolResult`].
    ///
    /// The model always gets a result back: unknown tools, non-object input
    /// and tool failures all become error results.
    pub async fn execute(&self, tool_use: &ToolUse) -> ToolResult {
        let name = tool_use.name.as_str();
        let id = tool_use.tool_use_id.as_str();

        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => {
                warn!(tool = name, tool_use_id = id, "tool not found");
                return ToolResult::error(id, format!("Error: Tool '{name}' not found"));
            }
        };

        let params: HashMap<String, Value> = match &tool_use.input {
            Value::Object(map) => map.clone().into_iter().collect(),
            Value::Null => HashMap::new(),
            other => {
                warn!(tool = name, tool_use_id = id, "tool input is not an object");
                return ToolResult::error(
                    id,
                    format!("Error: input for {name} must be an object, got {other}"),
                );
            }
        };

        match tool.execute(params).await {
            Ok(output) => ToolResult::success(id, output),
            Err(e) => {
                warn!(tool = name, tool_use_id = id, error = %e, "tool execution failed");
                ToolResult::error(id, format!("Error executing {name}: {e}"))
            }
        }
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
