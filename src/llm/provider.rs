//! Provider adapter trait for LLM backends.
//!
//! Defines the [`ProviderAdapter`] trait that chat-completion backends
//! satisfy. Adapters normalize provider-specific APIs into the shared
//! [`LlmEvent`] stream.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use super::error::LlmError;
use super::events::LlmEvent;
use super::message::Message;

/// A tool definition provided to the LLM for function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name (e.g. `"get_datetime"`).
    pub name: String,
    /// Human-readable description of the tool's purpose.
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Generation parameters for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Maximum tokens to generate. `None` means provider default.
    pub max_tokens: Option<u32>,
    /// Sampling temperature. `None` means provider default.
    pub temperature: Option<f32>,
}

impl RequestOptions {
    /// Create request options with provider defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A boxed stream of normalized LLM events.
pub type LlmEventStream = Pin<Box<dyn Stream<Item = LlmEvent> + Send>>;

/// Trait for LLM provider adapters.
///
/// An empty `tools` slice means the request carries no tool manifest at all.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Returns the provider name (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Start a streaming completion over the given history.
    async fn send(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        tools: &[ToolDefinition],
    ) -> Result<LlmEventStream, LlmError>;
}
