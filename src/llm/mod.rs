//! LLM provider layer: message types, streaming events and the
//! OpenAI-compatible chat completions adapter.

pub mod error;
pub mod events;
pub mod message;
pub mod openai;
pub mod provider;
pub mod sse;

pub use error::LlmError;
pub use events::{FinishReason, LlmEvent};
pub use message::{AssistantToolCall, Message, MessageContent, Role};
pub use openai::{OpenAiAdapter, OpenAiConfig};
pub use provider::{LlmEventStream, ProviderAdapter, RequestOptions, ToolDefinition};
