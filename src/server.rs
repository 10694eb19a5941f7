//! HTTP / WebSocket transport.
//!
//! ## Endpoints
//!
//! - `GET /health`: liveness check
//! - `GET /ws`: one voice session per connection. Binary frames carry
//!   PCM s16le 16 kHz mono audio in and PCM s16le 24 kHz mono audio out;
//!   text frames carry JSON control messages.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{PromptContext, ReasoningLoop, request_options};
use crate::asr::SonioxClient;
use crate::config::VoiceAgentConfig;
use crate::error::{Result, SpeechError};
use crate::llm::{
    LlmError, LlmEventStream, Message as LlmMessage, OpenAiAdapter, OpenAiConfig, ProviderAdapter,
    RequestOptions, ToolDefinition,
};
use crate::pipeline::{
    ClientMessage, Outbound, ServerMessage, SessionInfo, SessionParts, VoiceSession,
    parse_client_message,
};
use crate::skills::SkillManager;
use crate::soul::{SoulInfo, SoulStore};
use crate::tools::create_default_registry;
use crate::tts::QwenSynthesizer;

#[derive(Clone)]
struct AppState {
    config: Arc<VoiceAgentConfig>,
}

/// Running transport server.
pub struct AgentServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl AgentServer {
    /// Bind `server.bind_addr` (port `0` picks a free port) and serve in a
    /// background task.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Transport`] if the listener cannot bind.
    pub async fn start(config: VoiceAgentConfig) -> Result<Self> {
        let bind_addr = config.server.bind_addr.clone();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| SpeechError::Transport(format!("bind {bind_addr} failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| SpeechError::Transport(format!("failed to get local addr: {e}")))?;

        let app = router(Arc::new(config));
        info!("voice agent listening on http://{addr}");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("server error: {e}");
            }
        });
        Ok(Self { addr, handle })
    }

    /// Returns the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Abort the server task.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for AgentServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Routes for `/health` and `/ws`.
pub fn router(config: Arc<VoiceAgentConfig>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(AppState { config })
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.config))
}

/// Error messages for each upstream whose credentials are missing.
pub fn missing_credentials(config: &VoiceAgentConfig) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if !config.asr_configured() {
        missing.push("Missing SONIOX_API_KEY");
    }
    if !config.llm_configured() {
        missing.push("Missing LLM_BASE_URL / LLM_API_KEY / LLM_MODEL");
    }
    if !config.tts_configured() {
        missing.push("Missing DASHSCOPE_API_KEY or TTS_VOICE_ID");
    }
    missing
}

/// Stands in for the chat endpoint when it is not configured; every call
/// fails, which the session reports per turn.
struct UnconfiguredProvider {
    reason: String,
}

#[async_trait]
impl ProviderAdapter for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn send(
        &self,
        _messages: &[LlmMessage],
        _options: &RequestOptions,
        _tools: &[ToolDefinition],
    ) -> std::result::Result<LlmEventStream, LlmError> {
        Err(LlmError::Unconfigured(self.reason.clone()))
    }
}

/// Build the collaborators and session for one connection.
pub fn build_session(
    config: &VoiceAgentConfig,
    out: mpsc::UnboundedSender<Outbound>,
) -> (VoiceSession, SessionInfo) {
    let mut skills = SkillManager::new(config.skills.dirs.clone());
    let discovered = skills.discover();
    debug!(discovered, "skills discovered for connection");
    let skills = Arc::new(Mutex::new(skills));

    let soul = match SoulStore::open(&config.memory.soul_dir) {
        Ok(mut store) => {
            store.load();
            Some(Arc::new(Mutex::new(store)))
        }
        Err(e) => {
            warn!(error = %e, "soul store unavailable; memory tools disabled");
            None
        }
    };

    let registry = Arc::new(create_default_registry(config, skills.clone(), soul.clone()));
    let provider: Arc<dyn ProviderAdapter> =
        match OpenAiAdapter::new(OpenAiConfig::from(&config.llm)) {
            Ok(adapter) => Arc::new(adapter),
            Err(e) => {
                warn!(error = %e, "LLM provider not configured");
                Arc::new(UnconfiguredProvider {
                    reason: e.to_string(),
                })
            }
        };

    let info = SessionInfo {
        llm_model: config.llm.model.clone(),
        tts_model: config.tts.model.clone(),
        tts_voice: config.tts.voice.clone(),
        asr_configured: config.asr_configured(),
        llm_configured: config.llm_configured(),
        tts_configured: config.tts_configured(),
        soniox_ws_url: config.asr.ws_url.clone(),
        tts_ws_url: config.tts.ws_url.clone(),
        llm_base_url: config.llm.base_url.clone(),
        tools: registry.names().into_iter().map(String::from).collect(),
        skills: skills
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .infos(),
        soul: soul
            .as_ref()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).info())
            .unwrap_or_else(SoulInfo::default),
    };

    let agent = ReasoningLoop::new(
        provider,
        registry,
        PromptContext::new(skills.clone(), soul.clone()),
        config.agent.clone(),
        request_options(&config.llm),
    );
    let parts = SessionParts {
        config: config.session.clone(),
        asr: Arc::new(SonioxClient::new(config.asr.clone())),
        tts: Arc::new(QwenSynthesizer::new(config.tts.clone())),
        agent,
        skills,
        soul,
    };
    (VoiceSession::new(parts, out), info)
}

async fn handle_connection(socket: WebSocket, config: Arc<VoiceAgentConfig>) {
    info!("client connected");
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let msg = match frame {
                Outbound::Json(msg) => match serde_json::to_string(&msg) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        warn!(kind = msg.kind(), error = %e, "failed to serialize message");
                        continue;
                    }
                },
                Outbound::Audio(pcm) => Message::Binary(pcm),
            };
            if sink.send(msg).await.is_err() {
                debug!("client socket closed");
                break;
            }
        }
    });

    let (session, info) = build_session(&config, out_tx.clone());
    let send = |msg: ServerMessage| {
        let _ = out_tx.send(Outbound::Json(msg));
    };
    send(ServerMessage::SessionInfo(info));
    for missing in missing_credentials(&config) {
        warn!("{missing}");
        send(ServerMessage::error(missing));
    }

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Binary(pcm)) => session.feed_audio(pcm),
            Ok(Message::Text(text)) => match parse_client_message(text.as_str()) {
                Ok(msg) => dispatch(&session, msg).await,
                Err(e) => {
                    warn!(error = %e, "rejected client message");
                    send(ServerMessage::error(e.to_string()));
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "client socket error");
                break;
            }
        }
    }

    info!("client disconnected");
    session.stop_session().await;
    drop(session);
    drop(out_tx);
    writer.abort();
    let _ = writer.await;
}

async fn dispatch(session: &VoiceSession, msg: ClientMessage) {
    debug!(?msg, "client message");
    match msg {
        ClientMessage::StartSession => session.start_session().await,
        ClientMessage::StopSession => session.stop_session().await,
        ClientMessage::Interrupt => session.interrupt(),
        ClientMessage::ActivateSkill { name } => {
            session.activate_skill(&name);
        }
        ClientMessage::DeactivateSkill { name } => {
            session.deactivate_skill(&name);
        }
    }
}
