//! TinyAgent: real-time voice dialog orchestrator.
//!
//! One client connection drives one [`VoiceSession`]:
//! client audio → streaming ASR → reasoning loop (LLM + tools) → streaming TTS → client audio
//!
//! # Architecture
//!
//! - **ASR**: Soniox realtime recognition over an async WebSocket
//! - **Agent**: multi-round tool-calling loop over an OpenAI-compatible endpoint
//! - **Tools / skills / soul**: built-in tools, `SKILL.md` skills and a file-backed identity store
//! - **TTS**: Qwen realtime synthesis on a dedicated worker thread
//! - **Pipeline**: the session state machine, turn metrics and interruption
//! - **Server**: axum HTTP/WebSocket transport

pub mod agent;
pub mod asr;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod server;
pub mod skills;
pub mod soul;
pub mod tools;
pub mod tts;

pub use config::VoiceAgentConfig;
pub use error::{Result, SpeechError};
pub use pipeline::{SessionParts, SessionState, VoiceSession};
pub use server::AgentServer;
