//! Tool trait definition

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::ToolError;

/// Argument map passed to tools
///
/// Values originate as trimmed strings from the plan parser; tools may
/// JSON-decode individual scalars where their schema calls for it.
pub type ToolArgs = serde_json::Map<String, Value>;

/// A named capability exposed to the planner
///
/// Tools are registered once at startup and retained for the process
/// lifetime.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the name the planner emits in plan steps)
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> String;

    /// JSON Schema for input parameters
    fn parameters(&self) -> Value;

    /// Execute the tool
    async fn execute(&self, args: &ToolArgs) -> Result<String, ToolError>;
}

/// Snapshot of a tool's public descriptor, for LMs with native tool-use
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Extract a required string argument
pub fn require_str<'a>(args: &'a ToolArgs, key: &'static str) -> Result<&'a str, ToolError> {
    match args.get(key) {
        None => Err(ToolError::MissingParameter(key)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ToolError::InvalidArgument(format!("{key} must be a string, got {other}"))),
    }
}

/// Extract an optional string argument
pub fn optional_str<'a>(args: &'a ToolArgs, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
