//! Conversation history entries.
//!
//! ```
//! use tinyagent::llm::{Message, Role};
//!
//! let asked = Message::user("今天天气怎么样");
//! assert_eq!(asked.role, Role::User);
//!
//! let answered = Message::tool_result("call_1", "get_datetime", "2026-01-01 09:00:00");
//! assert_eq!(answered.tool_call_id(), Some("call_1"));
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// The `role` value on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text { text: String },
    /// Output of one tool call, tied back to the call by `call_id`.
    ToolResult {
        call_id: String,
        name: String,
        content: String,
    },
}

/// A tool call the assistant made, as replayed to the model next round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantToolCall {
    pub call_id: String,
    pub function_name: String,
    /// Raw JSON arguments string.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Only set on assistant messages.
    pub tool_calls: Vec<AssistantToolCall>,
}

impl Message {
    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text { text: text.into() },
            tool_calls: Vec::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    /// Assistant turn that asked for tools; `text` is whatever it said
    /// alongside them.
    pub fn assistant_with_tool_calls(
        text: Option<String>,
        tool_calls: Vec<AssistantToolCall>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, text.unwrap_or_default())
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                call_id: call_id.into(),
                name: name.into(),
                content: content.into(),
            },
            tool_calls: Vec::new(),
        }
    }

    /// Text body, or the tool output for tool results.
    pub fn text_content(&self) -> &str {
        match &self.content {
            MessageContent::Text { text } => text,
            MessageContent::ToolResult { content, .. } => content,
        }
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        match &self.content {
            MessageContent::ToolResult { call_id, .. } => Some(call_id),
            MessageContent::Text { .. } => None,
        }
    }
}
