//! Error types for the voice agent.

use crate::llm::LlmError;

/// Top-level error type for the voice dialog system.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Streaming speech recognition error.
    #[error("ASR error: {0}")]
    Asr(String),

    /// Speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Language model error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Upstream connection could not be established.
    #[error("{service} connection failed: {detail}")]
    Connection {
        /// Which upstream (`asr`, `tts`, `llm`).
        service: &'static str,
        /// Human-readable failure detail.
        detail: String,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Identity / memory storage error.
    #[error("memory error: {0}")]
    Memory(String),

    /// Skill discovery or parsing error.
    #[error("skill error: {0}")]
    Skill(String),

    /// Session coordination error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Client-facing transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl SpeechError {
    /// Short type label used in `connection_status` details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Asr(_) => "AsrError",
            Self::Tts(_) => "TtsError",
            Self::Llm(_) => "LlmError",
            Self::Connection { .. } => "ConnectionError",
            Self::Config(_) => "ConfigError",
            Self::Memory(_) => "MemoryError",
            Self::Skill(_) => "SkillError",
            Self::Pipeline(_) => "PipelineError",
            Self::Transport(_) => "TransportError",
            Self::Io(_) => "IoError",
            Self::Channel(_) => "ChannelError",
        }
    }
}

impl From<LlmError> for SpeechError {
    fn from(e: LlmError) -> Self {
        Self::Llm(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SpeechError>;
