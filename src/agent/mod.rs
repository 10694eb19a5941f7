//! The reasoning loop and its supporting pieces.
//!
//! - [`accumulator`]: reassembles one streamed model response
//! - [`events`]: lifecycle notifications and the output channel item type
//! - [`history`]: history repair, prose conversion and session summaries
//! - [`prompt`]: system prompt composition
//! - [`loop_engine`]: the multi-round model/tool loop

pub mod accumulator;
pub mod events;
pub mod history;
pub mod loop_engine;
pub mod prompt;

pub use accumulator::{AccumulatedResponse, AssembledToolCall, ResponseAccumulator};
pub use events::{AgentEvent, AgentOutput};
pub use loop_engine::{ReasoningLoop, StopReason, TurnSummary, request_options};
pub use prompt::PromptContext;
