//! Session orchestration: the per-connection state machine tying speech
//! recognition, the reasoning loop and speech synthesis together.

pub mod gate;
pub mod messages;
pub mod metrics;
pub mod session;

pub use gate::UtteranceGate;
pub use messages::{
    ClientMessage, ClientMessageError, ConnectionState, Outbound, ServerMessage, Service,
    SessionInfo, SessionState, ToolPhase, TurnEvent, parse_client_message,
};
pub use metrics::{TurnClock, TurnMetrics};
pub use session::{SessionParts, VoiceSession, new_turn_id};
