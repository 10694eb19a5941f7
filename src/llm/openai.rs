//! OpenAI-compatible Chat Completions adapter.
//!
//! Works against any endpoint speaking the `/chat/completions` streaming
//! protocol (OpenAI, DashScope compatible mode, vLLM, Ollama, ...).
//! `base_url` is the API root including the version segment, e.g.
//! `https://api.openai.com/v1`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::error::{LlmError, error_message};
use super::events::{FinishReason, LlmEvent};
use super::message::{Message, MessageContent};
use super::provider::{LlmEventStream, ProviderAdapter, RequestOptions, ToolDefinition};
use super::sse::{ChunkReader, Frame};
use crate::config::LlmConfig;

/// Configuration for the OpenAI-compatible adapter.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key for authentication.
    pub api_key: String,
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// The model to use.
    pub model: String,
    /// Whole-request timeout.
    pub request_timeout: Duration,
}

impl OpenAiConfig {
    /// Create a new config with the given API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".into(),
            model: model.into(),
            request_timeout: Duration::from_secs(120),
        }
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Chat completions endpoint for this config.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl From<&LlmConfig> for OpenAiConfig {
    fn from(cfg: &LlmConfig) -> Self {
        let mut out = Self::new(&cfg.api_key, &cfg.model).with_base_url(&cfg.base_url);
        out.request_timeout = Duration::from_secs(cfg.request_timeout_secs);
        out
    }
}

// ── Request Builders ──────────────────────────────────────────

/// Build the JSON request body for the Chat Completions API.
///
/// `tools` and `tool_choice` are only present when `tools` is non-empty.
pub fn build_completions_request(
    model: &str,
    messages: &[Message],
    options: &RequestOptions,
    tools: &[ToolDefinition],
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages.iter().map(message_to_openai).collect::<Vec<_>>(),
        "stream": true,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(max_tokens) = options.max_tokens {
            obj.insert("max_tokens".into(), serde_json::json!(max_tokens));
        }
        if let Some(temp) = options.temperature {
            obj.insert("temperature".into(), serde_json::json!(temp));
        }
        if !tools.is_empty() {
            obj.insert("tools".into(), tools_to_openai(tools));
            obj.insert("tool_choice".into(), serde_json::json!("auto"));
        }
    }

    body
}

fn message_to_openai(msg: &Message) -> serde_json::Value {
    let role = msg.role.as_str();

    match &msg.content {
        MessageContent::Text { text } => {
            if msg.tool_calls.is_empty() {
                return serde_json::json!({ "role": role, "content": text });
            }
            let tool_calls: Vec<serde_json::Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.call_id,
                        "type": "function",
                        "function": {
                            "name": tc.function_name,
                            "arguments": tc.arguments,
                        }
                    })
                })
                .collect();
            let content = if text.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::json!(text)
            };
            serde_json::json!({
                "role": role,
                "content": content,
                "tool_calls": tool_calls,
            })
        }
        MessageContent::ToolResult {
            call_id,
            name,
            content,
        } => serde_json::json!({
            "role": "tool",
            "tool_call_id": call_id,
            "name": name,
            "content": content,
        }),
    }
}

fn tools_to_openai(tools: &[ToolDefinition]) -> serde_json::Value {
    let tools_json: Vec<serde_json::Value> = tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect();
    serde_json::json!(tools_json)
}

// ── Response Parsing ──────────────────────────────────────────

/// Parse one SSE `data:` payload from the Chat Completions stream.
///
/// Unparseable payloads yield no events.
pub fn parse_completions_chunk(data: &str) -> Vec<LlmEvent> {
    let parsed: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable completion chunk");
            return Vec::new();
        }
    };

    if parsed.get("error").is_some() {
        return vec![LlmEvent::StreamError {
            error: error_message(data),
        }];
    }

    let mut events = Vec::new();
    let Some(choices) = parsed.get("choices").and_then(|c| c.as_array()) else {
        return events;
    };

    for choice in choices {
        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(|c| c.as_str())
                && !content.is_empty()
            {
                events.push(LlmEvent::TextDelta {
                    text: content.to_string(),
                });
            }

            if let Some(tool_calls) = delta.get("tool_calls").and_then(|tc| tc.as_array()) {
                for tc in tool_calls {
                    let index = tc
                        .get("index")
                        .and_then(|i| i.as_u64())
                        .and_then(|i| u32::try_from(i).ok())
                        .unwrap_or(0);
                    let function = tc.get("function");
                    let non_empty = |v: Option<&serde_json::Value>| {
                        v.and_then(|s| s.as_str())
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                    };
                    events.push(LlmEvent::ToolCallDelta {
                        index,
                        id: non_empty(tc.get("id")),
                        name: non_empty(function.and_then(|f| f.get("name"))),
                        args_fragment: non_empty(function.and_then(|f| f.get("arguments"))),
                    });
                }
            }
        }

        if let Some(finish_reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            events.push(LlmEvent::StreamEnd {
                finish_reason: FinishReason::parse(finish_reason),
            });
        }
    }

    events
}

// ── Adapter ───────────────────────────────────────────────────

/// Streaming adapter for OpenAI-compatible chat completions.
pub struct OpenAiAdapter {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl OpenAiAdapter {
    /// Create a new adapter with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.base_url.trim().is_empty() || config.model.trim().is_empty() {
            return Err(LlmError::Unconfigured(
                "LLM base_url and model must be set".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LlmError::Unconfigured(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { config, client })
    }

    /// Model identifier sent with every request.
    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        tools: &[ToolDefinition],
    ) -> Result<LlmEventStream, LlmError> {
        let url = self.config.completions_url();
        let body = build_completions_request(&self.config.model, messages, options, tools);

        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "chat completion rejected");
            return Err(LlmError::from_status(status.as_u16(), &body_text));
        }

        if let Some(request_id) = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
        {
            tracing::debug!(request_id, "chat completion streaming");
        }

        Ok(Box::pin(create_event_stream(response.bytes_stream())))
    }
}

struct StreamState {
    body: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    reader: ChunkReader,
    finished: bool,
    pending: VecDeque<LlmEvent>,
}

impl StreamState {
    /// Queue events for `frame`; returns false once `[DONE]` arrives.
    fn take(&mut self, frame: Frame) -> bool {
        match frame {
            Frame::Chunk(data) => {
                self.pending.extend(parse_completions_chunk(&data));
                true
            }
            Frame::Done => false,
        }
    }
}

fn create_event_stream(
    body: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = LlmEvent> + Send {
    futures_util::stream::unfold(
        StreamState {
            body: Box::pin(body),
            reader: ChunkReader::new(),
            finished: false,
            pending: VecDeque::new(),
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((event, state));
                }
                if state.finished {
                    return None;
                }

                match state.body.next().await {
                    Some(Ok(bytes)) => {
                        for frame in state.reader.feed(&bytes) {
                            if !state.take(frame) {
                                state.finished = true;
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        let err = LlmEvent::StreamError {
                            error: format!("stream read error: {e}"),
                        };
                        return Some((err, state));
                    }
                    None => {
                        state.finished = true;
                        if let Some(frame) = state.reader.finish() {
                            state.take(frame);
                        }
                    }
                }
            }
        },
    )
}
