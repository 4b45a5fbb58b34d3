//! Calculator tool: basic two-operand arithmetic.
//!
//! The built-in tool the CLI offers to the model, so spoken questions like
//! "what is 25 times 8" can round-trip through a real tool call.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::base::{require_f64, require_string, Tool};

// ─────────────────────────────────────────────
// CalculatorTool
// ─────────────────────────────────────────────

/// `calculator(operation, x, y)`.
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Perform basic arithmetic on two numbers: add, subtract, multiply, or divide."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["add", "subtract", "multiply", "divide"],
                    "description": "The arithmetic operation"
                },
                "x": { "type": "number", "description": "Left operand" },
                "y": { "type": "number", "description": "Right operand" }
            },
            "required": ["operation", "x", "y"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let operation = require_string(&params, "operation")?;
        let x = require_f64(&params, "x")?;
        let y = require_f64(&params, "y")?;

        let value = match operation.as_str() {
            "add" => x + y,
            "subtract" => x - y,
            "multiply" => x * y,
            "divide" => {
                if y == 0.0 {
                    anyhow::bail!("Division by zero");
                }
                x / y
            }
            other => anyhow::bail!("Unknown operation: {other}"),
        };

        debug!(operation = %operation, x, y, value, "calculated");
        Ok(format_number(value))
    }
}

/// Render whole numbers without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
