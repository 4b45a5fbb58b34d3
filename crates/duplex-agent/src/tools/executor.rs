//! Tool executor: runs one tool use to completion.
//!
//! The event loop only depends on [`ToolExecutor`]; the default
//! [`ConcurrentToolExecutor`] dispatches through a [`ToolRegistry`] and
//! bounds every call with a timeout. Concurrency comes from the event loop
//! spawning one task per tool use.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use duplex_core::types::{ToolResult, ToolUse};
use tracing::{info, warn};

use super::registry::ToolRegistry;

/// Runs a tool invocation and yields its result. Never fails: errors are
/// reported to the model as error results.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_use: &ToolUse) -> ToolResult;
}

/// Registry-backed executor with a per-call timeout.
pub struct ConcurrentToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ConcurrentToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }
}

#[async_trait]
impl ToolExecutor for ConcurrentToolExecutor {
    async fn execute(&self, tool_use: &ToolUse) -> ToolResult {
        info!(tool = %tool_use.name, tool_use_id = %tool_use.tool_use_id, "executing tool");

        match tokio::time::timeout(self.timeout, self.registry.execute(tool_use)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    tool = %tool_use.name,
                    tool_use_id = %tool_use.tool_use_id,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "tool timed out"
                );
                ToolResult::error(
                    &tool_use.tool_use_id,
                    format!(
                        "Error: {} timed out after {:.1}s",
                        tool_use.name,
                        self.timeout.as_secs_f64()
                    ),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CalculatorTool, Tool};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps for a long time"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("done".into())
        }
    }

    fn executor(timeout: Duration) -> ConcurrentToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorTool::new()));
        registry.register(Arc::new(SlowTool));
        ConcurrentToolExecutor::new(Arc::new(registry), timeout)
    }

    #[tokio::test]
    async fn test_executes_through_registry() {
        let exec = executor(Duration::from_secs(1));
        let use_ = ToolUse::new("t1", "calculator", json!({"operation": "add", "x": 2, "y": 2}));
        assert_eq!(exec.execute(&use_).await, ToolResult::success("t1", "4"));
    }

    #[tokio::test]
    async fn test_timeout_yields_error_result() {
        let exec = executor(Duration::from_millis(20));
        let result = exec.execute(&ToolUse::new("t2", "slow", json!({}))).await;
        assert!(result.is_error());
        assert_eq!(result.tool_use_id, "t2");
        assert!(result.content.contains("timed out"));
    }
}
