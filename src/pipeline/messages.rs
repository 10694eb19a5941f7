//! Messages exchanged with the client transport.
//!
//! Outbound JSON messages carry a `type` tag; synthesized audio goes out
//! as raw binary frames (PCM s16le, 24 kHz, mono).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::metrics::TurnMetrics;
use crate::skills::SkillInfo;
use crate::soul::SoulInfo;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Listening,
    Thinking,
    Executing,
    Speaking,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Executing => "executing",
            Self::Speaking => "speaking",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream service named in `connection_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Asr,
    Tts,
    Llm,
}

/// Connection state reported in `connection_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Idle,
    Error,
}

/// Turn lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    UserCommitted,
    Finished,
}

/// Tool lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Start,
    Result,
}

/// Sent once per connection, before the session starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub llm_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub asr_configured: bool,
    pub llm_configured: bool,
    pub tts_configured: bool,
    pub soniox_ws_url: String,
    pub tts_ws_url: String,
    pub llm_base_url: String,
    pub tools: Vec<String>,
    pub skills: Vec<SkillInfo>,
    pub soul: SoulInfo,
}

/// Outbound JSON message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    State {
        state: SessionState,
    },
    ConnectionStatus {
        service: Service,
        status: ConnectionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    SessionInfo(SessionInfo),
    SkillsList {
        skills: Vec<SkillInfo>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        turn_id: Option<String>,
    },
    Turn {
        event: TurnEvent,
        turn_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Asr {
        text: String,
        is_final: bool,
    },
    Llm {
        turn_id: String,
        text: String,
        done: bool,
        token_index: u64,
        elapsed_ms: u64,
    },
    Tool {
        event: ToolPhase,
        turn_id: String,
        tool_call_id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
    },
    Skill {
        event: String,
        name: String,
        skills: Vec<SkillInfo>,
    },
    Metrics(TurnMetrics),
}

impl ServerMessage {
    /// `error` without a turn id.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            turn_id: None,
        }
    }

    /// `connection_status` without detail.
    pub fn status(service: Service, status: ConnectionState) -> Self {
        Self::ConnectionStatus {
            service,
            status,
            detail: None,
        }
    }

    /// Tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::State { .. } => "state",
            Self::ConnectionStatus { .. } => "connection_status",
            Self::SessionInfo(_) => "session_info",
            Self::SkillsList { .. } => "skills_list",
            Self::Error { .. } => "error",
            Self::Turn { .. } => "turn",
            Self::Asr { .. } => "asr",
            Self::Llm { .. } => "llm",
            Self::Tool { .. } => "tool",
            Self::Skill { .. } => "skill",
            Self::Metrics(_) => "metrics",
        }
    }
}

/// One outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Json(ServerMessage),
    Audio(Bytes),
}

/// Inbound control message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartSession,
    StopSession,
    Interrupt,
    ActivateSkill {
        #[serde(default)]
        name: String,
    },
    DeactivateSkill {
        #[serde(default)]
        name: String,
    },
}

/// Why an inbound text frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientMessageError {
    #[error("Invalid JSON message")]
    InvalidJson,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

/// Parse an inbound text frame.
///
/// # Errors
///
/// Returns [`ClientMessageError::InvalidJson`] for unparseable input and
/// [`ClientMessageError::UnknownType`] for any other rejected message.
pub fn parse_client_message(raw: &str) -> Result<ClientMessage, ClientMessageError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| ClientMessageError::InvalidJson)?;
    let kind = match value.get("type") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "null".to_string(),
    };
    serde_json::from_value(value).map_err(|_| ClientMessageError::UnknownType(kind))
}
