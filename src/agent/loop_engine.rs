//! The per-turn reasoning loop.
//!
//! Each round sends the system prompt, the full history and the tool
//! manifest to the provider. A response carrying tool calls is executed
//! call by call, in index order, and the loop continues; a text response
//! ends the turn. When every round up to the cap produced tool calls, one
//! more call is made without tools over a prose rendering of the history.
//!
//! A round's text is held until its response ends and is spoken only if
//! the response carried no tool calls; text written alongside tool calls
//! stays in history. The tool-free forced call streams live.

use std::sync::{Arc, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::accumulator::{AccumulatedResponse, ResponseAccumulator};
use super::events::{AgentEvent, AgentOutput};
use super::history::{history_to_prose, sanitize_history, session_summary};
use super::prompt::PromptContext;
use crate::config::{AgentLoopConfig, LlmConfig};
use crate::llm::{
    AssistantToolCall, LlmError, LlmEvent, Message, ProviderAdapter, RequestOptions,
    ToolDefinition,
};
use crate::tools::{SKILL_MUTATING_TOOLS, ToolRegistry, truncate_chars};

/// Nudge appended to the forced text-only call.
pub const FINAL_ANSWER_NUDGE: &str = "(系统提示：你已经完成了多轮工具调用。请根据上面获得的工具结果，直接用语音友好的文字回复用户。不要再调用任何工具。)";

/// Reply spoken when the forced text-only call fails.
pub const FALLBACK_REPLY: &str = "抱歉，我处理这个请求时遇到了问题，请稍后再试。";

/// Result content recorded for calls skipped by cancellation.
pub const CANCELLED_TOOL_RESULT: &str = "Tool call cancelled";

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered with text within the round budget.
    Complete,
    /// The round budget was spent; the forced text-only call answered.
    ForcedFinal,
    /// The forced call failed; the canned reply was spoken.
    Fallback,
    /// The turn's cancellation token fired.
    Cancelled,
}

/// Outcome of one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    /// Text spoken to the user during the turn.
    pub text: String,
    /// Model calls made, including the forced call.
    pub model_calls: u32,
    /// Tool calls executed.
    pub tool_calls: u32,
    pub stop: StopReason,
}

/// Request options derived from the LLM section.
pub fn request_options(config: &LlmConfig) -> RequestOptions {
    let mut options = RequestOptions::new();
    if let Some(max_tokens) = config.max_tokens {
        options = options.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = config.temperature {
        options = options.with_temperature(temperature);
    }
    options
}

enum RoundOutcome {
    /// The stream ended. `held` are text deltas not yet spoken.
    Finished {
        acc: ResponseAccumulator,
        held: Vec<String>,
    },
    /// Cancelled mid-stream, with the text already spoken.
    Cancelled(String),
}

/// Multi-round model/tool loop owning one session's conversation history.
pub struct ReasoningLoop {
    provider: Arc<dyn ProviderAdapter>,
    registry: Arc<ToolRegistry>,
    context: PromptContext,
    config: AgentLoopConfig,
    options: RequestOptions,
    system_prompt: String,
    history: Vec<Message>,
}

impl std::fmt::Debug for ReasoningLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningLoop")
            .field("provider", &self.provider.name())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("history_len", &self.history.len())
            .finish()
    }
}

impl ReasoningLoop {
    /// Create a loop with empty history.
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        registry: Arc<ToolRegistry>,
        context: PromptContext,
        config: AgentLoopConfig,
        options: RequestOptions,
    ) -> Self {
        let system_prompt = context.build_system_prompt();
        Self {
            provider,
            registry,
            context,
            config,
            options,
            system_prompt,
            history: Vec::new(),
        }
    }

    /// Conversation history (without the system prompt).
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// The system prompt sent with the next call.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Rebuild the system prompt from the soul and skill state.
    pub fn refresh_system_prompt(&mut self) {
        self.system_prompt = self.context.build_system_prompt();
    }

    /// Forget the conversation.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Summary of the conversation for the memory store.
    pub fn session_summary(&self, completed_turns: u32) -> Option<String> {
        session_summary(&self.history, completed_turns)
    }

    /// Run one turn for `user_text`.
    ///
    /// Spoken tokens and lifecycle events are sent on `out` in order.
    /// Returns early with [`StopReason::Cancelled`] once `cancel` fires;
    /// no token is sent after cancellation is observed.
    ///
    /// # Errors
    ///
    /// Returns the provider error when a regular round fails to connect or
    /// the stream reports an error. Failure of the forced final call is
    /// not an error; the canned reply is spoken instead.
    pub async fn run_turn(
        &mut self,
        user_text: &str,
        out: &mpsc::UnboundedSender<AgentOutput>,
        cancel: &CancellationToken,
    ) -> Result<TurnSummary, LlmError> {
        sanitize_history(&mut self.history);
        self.refresh_system_prompt();
        self.history.push(Message::user(user_text));

        let tools = self.registry.definitions();
        let mut summary = TurnSummary {
            text: String::new(),
            model_calls: 0,
            tool_calls: 0,
            stop: StopReason::Complete,
        };
        let mut tool_seq: u32 = 0;

        for round in 1..=self.config.max_tool_rounds {
            if cancel.is_cancelled() {
                tracing::info!(round, "turn cancelled before round");
                return Ok(cancelled(summary));
            }
            emit(out, AgentOutput::Event(AgentEvent::Thinking {
                round,
                final_call: false,
            }));

            let messages = self.request_messages();
            summary.model_calls += 1;
            let (response, held) = match self
                .stream_response(&messages, &tools, out, cancel, &mut summary.text)
                .await?
            {
                RoundOutcome::Finished { acc, held } => (acc, held),
                RoundOutcome::Cancelled(partial) => {
                    if !partial.is_empty() {
                        self.history.push(Message::assistant(partial));
                    }
                    return Ok(cancelled(summary));
                }
            };
            let response = finish(response, round, tool_seq);

            if let Some(error) = response.error {
                tracing::error!(round, error = %error, "model stream failed");
                return Err(LlmError::Stream(error));
            }

            if response.tool_calls.is_empty() {
                tracing::info!(
                    round,
                    finish = ?response.finish_reason,
                    chars = response.text.chars().count(),
                    "model answered"
                );
                for token in held {
                    summary.text.push_str(&token);
                    emit(out, AgentOutput::Token(token));
                }
                if !response.text.is_empty() {
                    self.history.push(Message::assistant(response.text));
                }
                return Ok(summary);
            }

            tracing::info!(
                round,
                tools = ?response.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "model requested tool calls"
            );
            tool_seq += response.tool_calls.len() as u32;

            let preamble = (!response.text.is_empty()).then(|| response.text.clone());
            let history_calls: Vec<AssistantToolCall> = response
                .tool_calls
                .iter()
                .map(|c| c.to_assistant_call())
                .collect();
            self.history
                .push(Message::assistant_with_tool_calls(preamble, history_calls));

            for (i, call) in response.tool_calls.iter().enumerate() {
                if cancel.is_cancelled() {
                    for skipped in &response.tool_calls[i..] {
                        self.history.push(Message::tool_result(
                            &skipped.call_id,
                            &skipped.name,
                            CANCELLED_TOOL_RESULT,
                        ));
                    }
                    tracing::info!(round, "turn cancelled during tool execution");
                    return Ok(cancelled(summary));
                }

                emit(out, AgentOutput::Event(AgentEvent::ToolStart {
                    tool_call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                }));

                let started = Instant::now();
                let result = self
                    .registry
                    .execute(&call.name, call.arguments.clone(), cancel)
                    .await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                summary.tool_calls += 1;

                tracing::debug!(
                    tool = %call.name,
                    is_error = result.is_error,
                    elapsed_ms,
                    "tool finished"
                );

                self.history.push(Message::tool_result(
                    &call.call_id,
                    &call.name,
                    &result.content,
                ));

                emit(out, AgentOutput::Event(AgentEvent::ToolResult {
                    tool_call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    content: truncate_chars(&result.content, self.config.tool_result_preview_chars)
                        .0,
                    is_error: result.is_error,
                    elapsed_ms,
                }));

                if SKILL_MUTATING_TOOLS.contains(&call.name.as_str()) {
                    self.refresh_system_prompt();
                    let skills = self
                        .context
                        .skills
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .infos();
                    let action = if call.name == "activate_skill" {
                        "activated"
                    } else {
                        "deactivated"
                    };
                    emit(out, AgentOutput::Event(AgentEvent::SkillChanged {
                        action: action.to_string(),
                        skill_name: call
                            .arguments
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        skills,
                    }));
                }
            }
        }

        if cancel.is_cancelled() {
            return Ok(cancelled(summary));
        }
        self.forced_final(out, cancel, summary).await
    }

    /// One tool-free call over prose history, with the canned reply as a
    /// last resort.
    async fn forced_final(
        &mut self,
        out: &mpsc::UnboundedSender<AgentOutput>,
        cancel: &CancellationToken,
        mut summary: TurnSummary,
    ) -> Result<TurnSummary, LlmError> {
        tracing::warn!(
            max_rounds = self.config.max_tool_rounds,
            "round budget spent on tool calls, forcing a text-only answer"
        );
        emit(out, AgentOutput::Event(AgentEvent::Thinking {
            round: self.config.max_tool_rounds + 1,
            final_call: true,
        }));

        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(history_to_prose(&self.history));
        messages.push(Message::user(FINAL_ANSWER_NUDGE));

        summary.model_calls += 1;
        let spoken_before = summary.text.len();
        let outcome = self
            .stream_response(&messages, &[], out, cancel, &mut summary.text)
            .await;

        let failure = match outcome {
            Ok(RoundOutcome::Cancelled(partial)) => {
                if !partial.is_empty() {
                    self.history.push(Message::assistant(partial));
                }
                return Ok(cancelled(summary));
            }
            Ok(RoundOutcome::Finished { acc, .. }) => {
                let response = finish(acc, self.config.max_tool_rounds + 1, 0);
                match response.error {
                    Some(error) => error,
                    None if response.text.trim().is_empty() => "empty response".to_string(),
                    None => {
                        self.history.push(Message::assistant(response.text));
                        summary.stop = StopReason::ForcedFinal;
                        return Ok(summary);
                    }
                }
            }
            Err(e) => e.to_string(),
        };

        tracing::error!(error = %failure, "forced final call failed");
        if summary.text.len() > spoken_before {
            // Keep what was already spoken.
            let partial = summary.text[spoken_before..].to_string();
            self.history.push(Message::assistant(partial));
            summary.stop = StopReason::ForcedFinal;
            return Ok(summary);
        }

        emit(out, AgentOutput::Token(FALLBACK_REPLY.to_string()));
        summary.text.push_str(FALLBACK_REPLY);
        self.history.push(Message::assistant(FALLBACK_REPLY));
        summary.stop = StopReason::Fallback;
        Ok(summary)
    }

    fn request_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(self.history.iter().cloned());
        messages
    }

    /// Send one request and drain its stream.
    ///
    /// Text streams live only when no tools are offered; otherwise deltas
    /// are returned in `held` for the caller to speak once the response
    /// turns out to be a plain answer. Spoken text is appended to `spoken`.
    async fn stream_response(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        out: &mpsc::UnboundedSender<AgentOutput>,
        cancel: &CancellationToken,
        spoken: &mut String,
    ) -> Result<RoundOutcome, LlmError> {
        let mut stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(RoundOutcome::Cancelled(String::new())),
            sent = self.provider.send(messages, &self.options, tools) => sent?,
        };

        let live = tools.is_empty();
        let mut acc = ResponseAccumulator::new();
        let mut held = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(cancelled_round(&acc, live)),
                next = stream.next() => next,
            };
            let Some(event) = next else {
                break;
            };
            if let LlmEvent::TextDelta { text } = &event
                && !text.is_empty()
            {
                if live {
                    spoken.push_str(text);
                    emit(out, AgentOutput::Token(text.clone()));
                } else {
                    held.push(text.clone());
                }
            }
            acc.push(event);
        }

        if cancel.is_cancelled() {
            return Ok(cancelled_round(&acc, live));
        }
        Ok(RoundOutcome::Finished { acc, held })
    }
}

fn cancelled_round(acc: &ResponseAccumulator, live: bool) -> RoundOutcome {
    let spoken = if live {
        acc.text().to_string()
    } else {
        String::new()
    };
    RoundOutcome::Cancelled(spoken)
}

fn emit(out: &mpsc::UnboundedSender<AgentOutput>, item: AgentOutput) {
    if out.send(item).is_err() {
        tracing::debug!("agent output receiver dropped");
    }
}

fn cancelled(mut summary: TurnSummary) -> TurnSummary {
    summary.stop = StopReason::Cancelled;
    summary
}

fn finish(acc: ResponseAccumulator, round: u32, seq_start: u32) -> AccumulatedResponse {
    let now_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    acc.finish_with_seq(round, seq_start, now_millis)
}
