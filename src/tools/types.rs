//! Core tool types.
//!
//! Defines the [`Tool`] trait that all tools implement and [`ToolResult`]
//! for capturing bounded execution output.

use crate::llm::LlmError;

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    /// Text handed back to the model.
    pub content: String,
    /// Whether the content describes a failure.
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful tool result.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Create a failed tool result.
    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Truncate a string to at most `max_chars` characters.
///
/// Returns `(truncated_string, was_truncated)`.
pub fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => (s[..end].to_string(), true),
        None => (s.to_string(), false),
    }
}

/// Read a required string argument.
///
/// # Errors
///
/// Returns [`LlmError::Tool`] when the field is missing or not a string.
pub fn required_str<'a>(args: &'a serde_json::Value, field: &str) -> Result<&'a str, LlmError> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| LlmError::Tool(format!("missing required argument '{field}'")))
}

/// Core trait for LLM tools.
///
/// Tools are synchronous; the registry runs them on the blocking pool.
pub trait Tool: Send + Sync {
    /// Returns the tool name (e.g. "get_datetime").
    fn name(&self) -> &str;

    /// Returns a human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// Returns the JSON Schema for the tool's arguments.
    fn schema(&self) -> serde_json::Value;

    /// Execute the tool with the given JSON arguments.
    ///
    /// # Errors
    ///
    /// Returns `LlmError` for validation/execution failures; the registry
    /// converts these into error-flagged results.
    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError>;
}
