//! What a provider stream yields for one model call.
//!
//! Tool-call fragments are passed through keyed by the provider's index;
//! `agent::accumulator` stitches them back together.

#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    TextDelta {
        text: String,
    },

    /// Part of one tool call. `id` and `name` usually come only with the
    /// first fragment of an index; `args_fragment`s concatenate into JSON.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        args_fragment: Option<String>,
    },

    StreamEnd {
        finish_reason: FinishReason,
    },

    /// An error payload inside an otherwise successful response, or a
    /// broken body.
    StreamError {
        error: String,
    },
}

/// `finish_reason` of a chat completion choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    /// Cut off by `max_tokens`.
    Length,
    Other,
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" => Self::Stop,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "length" => Self::Length,
            _ => Self::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_function_call_counts_as_tool_calls() {
        assert_eq!(FinishReason::parse("function_call"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("content_filter"), FinishReason::Other);
        assert_eq!(FinishReason::parse("length"), FinishReason::Length);
    }
}
