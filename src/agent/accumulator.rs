//! Stream accumulator for one model response.
//!
//! Text deltas are concatenated. Tool-call deltas are keyed by the
//! provider-assigned index in an ordered map, so fragments for several
//! calls may interleave freely; [`ResponseAccumulator::finish`] walks the
//! map in index order to produce the final calls.
//!
//! ```
//! use tinyagent::agent::accumulator::ResponseAccumulator;
//! use tinyagent::llm::{FinishReason, LlmEvent};
//!
//! let mut acc = ResponseAccumulator::new();
//! acc.push(LlmEvent::ToolCallDelta {
//!     index: 0,
//!     id: Some("call_1".into()),
//!     name: Some("calculate".into()),
//!     args_fragment: Some("{\"expression\":".into()),
//! });
//! acc.push(LlmEvent::ToolCallDelta {
//!     index: 0,
//!     id: None,
//!     name: None,
//!     args_fragment: Some("\"1+1\"}".into()),
//! });
//! acc.push(LlmEvent::StreamEnd { finish_reason: FinishReason::ToolCalls });
//!
//! let response = acc.finish(1, 0);
//! assert_eq!(response.tool_calls[0].arguments["expression"], "1+1");
//! ```

use std::collections::BTreeMap;

use crate::llm::{AssistantToolCall, FinishReason, LlmEvent};

/// A tool call reassembled from streaming fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledToolCall {
    /// Call id from the provider, or a synthesized fallback id.
    pub call_id: String,
    /// Function name.
    pub name: String,
    /// Parsed arguments. Unparseable or missing arguments become `{}`.
    pub arguments: serde_json::Value,
}

impl AssembledToolCall {
    /// History form of this call.
    pub fn to_assistant_call(&self) -> AssistantToolCall {
        AssistantToolCall {
            call_id: self.call_id.clone(),
            function_name: self.name.clone(),
            arguments: self.arguments.to_string(),
        }
    }
}

/// The accumulated result of one model response.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedResponse {
    /// All text deltas concatenated.
    pub text: String,
    /// Tool calls in index order.
    pub tool_calls: Vec<AssembledToolCall>,
    /// Why the stream ended (`Other` if it never said).
    pub finish_reason: FinishReason,
    /// Stream error, if one was reported.
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    args: String,
}

/// Accumulates [`LlmEvent`]s for a single response.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    calls: BTreeMap<u32, PartialCall>,
    finish_reason: Option<FinishReason>,
    error: Option<String>,
}

impl ResponseAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Feed one event.
    pub fn push(&mut self, event: LlmEvent) {
        match event {
            LlmEvent::TextDelta { text } => self.text.push_str(&text),
            LlmEvent::ToolCallDelta {
                index,
                id,
                name,
                args_fragment,
            } => {
                let call = self.calls.entry(index).or_default();
                if let Some(id) = id.filter(|id| !id.trim().is_empty()) {
                    call.id = id;
                }
                if let Some(name) = name.filter(|n| !n.is_empty()) {
                    call.name = name;
                }
                if let Some(fragment) = args_fragment {
                    call.args.push_str(&fragment);
                }
            }
            LlmEvent::StreamEnd { finish_reason } => self.finish_reason = Some(finish_reason),
            LlmEvent::StreamError { error } => self.error = Some(error),
        }
    }

    /// Consume the accumulator.
    ///
    /// Calls without an id get `fallback_{round}_{seq}_{now_millis}`, where
    /// `seq` is `seq_start` plus the call's position.
    pub fn finish(self, round: u32, now_millis: u128) -> AccumulatedResponse {
        self.finish_with_seq(round, 0, now_millis)
    }

    /// [`finish`](Self::finish) with an explicit starting sequence number,
    /// so ids stay unique across rounds of one turn.
    pub fn finish_with_seq(
        self,
        round: u32,
        seq_start: u32,
        now_millis: u128,
    ) -> AccumulatedResponse {
        let tool_calls = self
            .calls
            .into_values()
            .enumerate()
            .map(|(pos, call)| {
                let seq = seq_start + pos as u32 + 1;
                let call_id = if call.id.is_empty() {
                    format!("fallback_{round}_{seq}_{now_millis}")
                } else {
                    call.id
                };
                let arguments = parse_arguments(&call.name, &call.args);
                AssembledToolCall {
                    call_id,
                    name: call.name,
                    arguments,
                }
            })
            .collect();

        AccumulatedResponse {
            text: self.text,
            tool_calls,
            finish_reason: self.finish_reason.unwrap_or(FinishReason::Other),
            error: self.error,
        }
    }
}

/// Parse a reassembled argument string. Malformed input is logged and
/// treated as an empty object so execution can proceed.
pub fn parse_arguments(tool: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        Ok(other) => {
            tracing::warn!(tool = %tool, arguments = %other, "tool arguments are not an object");
            serde_json::json!({})
        }
        Err(e) => {
            tracing::warn!(tool = %tool, raw = %raw, error = %e, "failed to parse tool arguments");
            serde_json::json!({})
        }
    }
}
