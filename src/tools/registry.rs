//! Tool registry.
//!
//! The [`ToolRegistry`] holds registered tools, provides lookup by name,
//! exports definitions for LLM API calls, and executes calls with a
//! timeout. Execution never returns an error: every failure becomes an
//! error-flagged [`ToolResult`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::types::{Tool, ToolResult};
use crate::llm::{LlmError, ToolDefinition};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new empty registry with the given per-call timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            timeout,
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Sorted names of all registered tools.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for the LLM manifest, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.schema()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute one tool call.
    ///
    /// Runs on the blocking pool under the registry timeout; unknown
    /// tools, tool errors, panics, timeouts and cancellation all come
    /// back as error-flagged results.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let Some(tool) = self.get(name) else {
            tracing::warn!(tool_name = %name, "tool not found in registry");
            return ToolResult::failure(format!("Unknown tool: {name}"));
        };

        if cancel.is_cancelled() {
            return ToolResult::failure("Tool call cancelled");
        }

        tracing::debug!(tool_name = %name, "executing tool");

        tokio::select! {
            () = cancel.cancelled() => {
                tracing::warn!(tool_name = %name, "tool execution cancelled");
                ToolResult::failure("Tool call cancelled")
            }
            result = tokio::time::timeout(
                self.timeout,
                tokio::task::spawn_blocking(move || tool.execute(args)),
            ) => match result {
                Ok(Ok(Ok(tool_result))) => tool_result,
                Ok(Ok(Err(e))) => {
                    tracing::warn!(tool_name = %name, error = %e, "tool execution failed");
                    let detail = match e {
                        LlmError::Tool(detail) => detail,
                        other => other.to_string(),
                    };
                    ToolResult::failure(format!("Tool error: {detail}"))
                }
                Ok(Err(join_err)) => {
                    tracing::error!(tool_name = %name, error = %join_err, "tool execution panicked");
                    ToolResult::failure(format!("Tool error: execution panicked: {join_err}"))
                }
                Err(_elapsed) => {
                    tracing::error!(
                        tool_name = %name,
                        timeout_secs = self.timeout.as_secs(),
                        "tool execution timed out"
                    );
                    ToolResult::failure(format!(
                        "Tool error: timed out after {}s",
                        self.timeout.as_secs()
                    ))
                }
            }
        }
    }
}
