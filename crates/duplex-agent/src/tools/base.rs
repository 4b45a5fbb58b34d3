//! Tool trait: the interface every agent tool implements.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use duplex_core::types::ToolSpec;

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// Every agent tool implements this trait.
///
/// The connection advertises tools to the model via `to_spec()` on every
/// (re)connect, and the executor dispatches tool uses via `execute()`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call this tool (e.g. `"calculator"`).
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema describing the input object.
    ///
    /// Must be `{"type": "object", "properties": {...}, "required": [...]}`.
    fn input_schema(&self) -> Value;

    /// Execute the tool with the given input fields.
    ///
    /// Returns the text the model reads. On failure return an `Err`; the
    /// registry turns it into an error tool result.
    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String>;

    /// Build the `ToolSpec` sent to the model.
    fn to_spec(&self) -> ToolSpec {
        ToolSpec::new(self.name(), self.description(), self.input_schema())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required `String` param, returning a user-friendly error.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

/// Extract a required number. Numeric strings (`"2.5"`) are accepted too,
/// since speech models often quote numbers.
pub fn require_f64(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<f64> {
    match params.get(key) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("Parameter {key} is not a finite number")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow::anyhow!("Parameter {key} is not a number: {s}")),
        Some(_) => anyhow::bail!("Parameter {key} must be a number"),
        None => anyhow::bail!("Missing required parameter: {key}"),
    }
}
