//! Lifecycle notifications emitted by the reasoning loop.

use serde::Serialize;

use crate::skills::SkillInfo;

/// A lifecycle notification for observers of a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A model call is about to be issued.
    Thinking {
        /// 1-based round number.
        round: u32,
        /// Set for the forced text-only call after the round cap.
        #[serde(rename = "final")]
        final_call: bool,
    },
    /// A tool call is about to run.
    ToolStart {
        tool_call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// A tool call finished.
    ToolResult {
        tool_call_id: String,
        name: String,
        /// Result content, truncated for display.
        content: String,
        is_error: bool,
        elapsed_ms: u64,
    },
    /// A skill tool changed the active skill set.
    SkillChanged {
        /// `activated` or `deactivated`.
        action: String,
        skill_name: String,
        skills: Vec<SkillInfo>,
    },
}

impl AgentEvent {
    /// Event tag (`thinking`, `tool_start`, `tool_result`, `skill_changed`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::SkillChanged { .. } => "skill_changed",
        }
    }
}

/// One item on the reasoning loop's output channel.
///
/// Events and spoken tokens share a channel so observers see them in the
/// order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    /// A lifecycle event.
    Event(AgentEvent),
    /// A fragment of the final spoken reply.
    Token(String),
}
