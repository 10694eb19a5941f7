//! Per-connection session orchestrator.
//!
//! A [`VoiceSession`] wires audio in to the speech channel, committed
//! utterances to turns, turns into the reasoning loop, spoken tokens into
//! the synthesizer and synthesized audio back out, and implements
//! interruption across all of them.
//!
//! # State machine
//!
//! ```text
//! idle -> listening -> thinking -> (executing <-> thinking)* -> speaking -> listening
//! ```
//!
//! `start_session` moves to `listening` and connects the speech channel;
//! `stop_session` always ends in `idle`. `interrupt` only acts while
//! `speaking` or `executing`; it cancels the active turn and returns to
//! `listening` immediately.
//!
//! # Tasks
//!
//! The session loop runs in one spawned task. Turns run inline in that
//! task, one at a time, raced against a per-turn cancellation token that
//! is a child of the session token: cancelling a turn leaves the session
//! and its speech channel running, stopping the session cancels both.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::gate::UtteranceGate;
use super::messages::{
    ConnectionState, Outbound, ServerMessage, Service, SessionState, ToolPhase, TurnEvent,
};
use super::metrics::TurnClock;
use crate::agent::{AgentEvent, AgentOutput, ReasoningLoop};
use crate::asr::{AsrConnection, AudioFrame, AudioSink, SpeechChannel, TranscriptFragment};
use crate::config::SessionConfig;
use crate::skills::SharedSkills;
use crate::soul::SharedSoul;
use crate::tts::SpeechSynthesizer;

/// Length of a turn id (hex characters of a v4 UUID).
const TURN_ID_LEN: usize = 12;

/// The collaborators a session is built from.
pub struct SessionParts {
    pub config: SessionConfig,
    pub asr: Arc<dyn SpeechChannel>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub agent: ReasoningLoop,
    pub skills: SharedSkills,
    pub soul: Option<SharedSoul>,
}

struct ActiveTurn {
    id: String,
    cancel: CancellationToken,
}

struct StateCell {
    state: SessionState,
    listening_since: Instant,
}

/// State shared between the control surface and the session task.
struct Shared {
    config: SessionConfig,
    asr: Arc<dyn SpeechChannel>,
    tts: Arc<dyn SpeechSynthesizer>,
    agent: tokio::sync::Mutex<ReasoningLoop>,
    skills: SharedSkills,
    soul: Option<SharedSoul>,
    out: mpsc::UnboundedSender<Outbound>,
    state: Mutex<StateCell>,
    running: AtomicBool,
    completed_turns: AtomicU32,
    audio: Mutex<Option<AudioSink>>,
    turn: Mutex<Option<ActiveTurn>>,
}

struct SessionTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One client connection's dialog session.
pub struct VoiceSession {
    shared: Arc<Shared>,
    task: tokio::sync::Mutex<Option<SessionTask>>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("state", &self.state())
            .field("completed_turns", &self.completed_turns())
            .finish_non_exhaustive()
    }
}

impl VoiceSession {
    /// Create an idle session. Outbound frames are sent on `out`.
    pub fn new(parts: SessionParts, out: mpsc::UnboundedSender<Outbound>) -> Self {
        let shared = Shared {
            config: parts.config,
            asr: parts.asr,
            tts: parts.tts,
            agent: tokio::sync::Mutex::new(parts.agent),
            skills: parts.skills,
            soul: parts.soul,
            out,
            state: Mutex::new(StateCell {
                state: SessionState::Idle,
                listening_since: Instant::now(),
            }),
            running: AtomicBool::new(false),
            completed_turns: AtomicU32::new(0),
            audio: Mutex::new(None),
            turn: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Turns completed since the last memory flush.
    pub fn completed_turns(&self) -> u32 {
        self.shared.completed_turns.load(Ordering::SeqCst)
    }

    /// Id of the turn in progress, if any.
    pub fn active_turn(&self) -> Option<String> {
        self.shared
            .turn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| t.id.clone())
    }

    /// Start the session loop. A no-op while one is already running.
    pub async fn start_session(&self) {
        let mut slot = self.task.lock().await;
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            info!("start_session ignored: session already running");
            return;
        }

        info!("starting session");
        self.shared.running.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let (sink, audio_rx) = AudioSink::channel();
        *self
            .shared
            .audio
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sink);

        let handle = tokio::spawn(session_loop(self.shared.clone(), audio_rx, cancel.clone()));
        *slot = Some(SessionTask { cancel, handle });
    }

    /// Stop everything and return to `idle`.
    ///
    /// Cancels synthesis and the active turn, waits for the session task,
    /// then appends a conversation summary to memory if any turn completed.
    /// Safe to call repeatedly and without a running session.
    pub async fn stop_session(&self) {
        info!("stopping session");
        let shared = &self.shared;
        shared.running.store(false, Ordering::SeqCst);

        let task = self.task.lock().await.take();
        if let Some(task) = &task {
            task.cancel.cancel();
        }
        shared.tts.cancel();
        if let Some(turn) = shared
            .turn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            turn.cancel.cancel();
        }
        if let Some(sink) = shared
            .audio
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sink.end();
        }

        if let Some(task) = task
            && let Err(e) = task.handle.await
        {
            if e.is_panic() {
                error!(error = %e, "session task panicked");
            } else {
                debug!(error = %e, "session task ended abnormally");
            }
        }

        shared.save_session_memory().await;
        shared.set_state(SessionState::Idle);
    }

    /// Cancel the active turn if one is speaking or executing tools.
    ///
    /// In any other state this does nothing: the state is unchanged and no
    /// cancellation is signalled.
    pub fn interrupt(&self) {
        let shared = &self.shared;
        let state = shared.state();
        info!(state = %state, "interrupt requested");
        if !matches!(state, SessionState::Speaking | SessionState::Executing) {
            return;
        }

        let turn_id = {
            let turn = shared.turn.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(turn) = turn.as_ref() else {
                return;
            };
            turn.cancel.cancel();
            turn.id.clone()
        };
        shared.tts.cancel();
        info!(turn_id = %turn_id, "turn interrupted");
        if shared.running.load(Ordering::SeqCst) {
            shared.set_state(SessionState::Listening);
        }
    }

    /// Queue raw PCM for recognition. Dropped unless the session is running.
    pub fn feed_audio(&self, chunk: Bytes) {
        if !self.shared.running.load(Ordering::SeqCst) {
            return;
        }
        if let Some(sink) = self
            .shared
            .audio
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            sink.send(chunk);
        }
    }

    /// Activate a skill on behalf of the client.
    pub fn activate_skill(&self, name: &str) -> bool {
        self.shared.change_skill(name, true)
    }

    /// Deactivate a skill on behalf of the client.
    pub fn deactivate_skill(&self, name: &str) -> bool {
        self.shared.change_skill(name, false)
    }
}

impl Shared {
    fn state(&self) -> SessionState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    fn listening_since(&self) -> Instant {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listening_since
    }

    /// Transition and notify. Repeated transitions to the same state are silent.
    fn set_state(&self, next: SessionState) {
        {
            let mut cell = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if cell.state == next {
                return;
            }
            cell.state = next;
            if next == SessionState::Listening {
                cell.listening_since = Instant::now();
            }
        }
        info!(state = %next, "session state");
        self.send(ServerMessage::State { state: next });
    }

    fn send(&self, msg: ServerMessage) {
        if self.out.send(Outbound::Json(msg)).is_err() {
            debug!("outbound channel closed");
        }
    }

    fn send_audio(&self, pcm: Bytes) {
        if self.out.send(Outbound::Audio(pcm)).is_err() {
            debug!("outbound channel closed");
        }
    }

    fn status(&self, service: Service, status: ConnectionState, detail: Option<String>) {
        self.send(ServerMessage::ConnectionStatus {
            service,
            status,
            detail,
        });
    }

    fn skill_infos(&self) -> Vec<crate::skills::SkillInfo> {
        self.skills
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .infos()
    }

    fn change_skill(&self, name: &str, activate: bool) -> bool {
        let changed = {
            let mut skills = self.skills.lock().unwrap_or_else(PoisonError::into_inner);
            if activate {
                skills.activate(name)
            } else {
                skills.deactivate(name)
            }
        };
        if !changed {
            warn!(skill = %name, activate, "skill change rejected");
            self.send(ServerMessage::error(format!("Unknown skill: {name}")));
            return false;
        }

        let skills = self.skill_infos();
        let event = if activate { "activated" } else { "deactivated" };
        info!(skill = %name, event, "skill changed by client");
        self.send(ServerMessage::Skill {
            event: event.to_string(),
            name: name.to_string(),
            skills: skills.clone(),
        });
        self.send(ServerMessage::SkillsList { skills });
        true
    }

    /// Append a conversation summary to memory, once per batch of turns.
    async fn save_session_memory(&self) {
        let turns = self.completed_turns.swap(0, Ordering::SeqCst);
        if turns == 0 {
            return;
        }
        let Some(soul) = &self.soul else {
            return;
        };
        let Some(summary) = self.agent.lock().await.session_summary(turns) else {
            return;
        };
        let result = soul
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append_summary(&summary);
        match result {
            Ok(()) => info!(turns, "session memory saved"),
            Err(e) => error!(error = %e, "failed to save session memory"),
        }
    }

    /// Run one turn to completion or cancellation. Always reports metrics
    /// and `turn finished` exactly once.
    async fn run_turn(&self, turn_id: String, text: String, session_cancel: &CancellationToken) {
        let cancel = session_cancel.child_token();
        *self.turn.lock().unwrap_or_else(PoisonError::into_inner) = Some(ActiveTurn {
            id: turn_id.clone(),
            cancel: cancel.clone(),
        });

        let started = Instant::now();
        let clock = Mutex::new(TurnClock::new(self.listening_since(), started));
        info!(turn_id = %turn_id, text = %text, "turn start");
        self.set_state(SessionState::Thinking);

        let interrupted = tokio::select! {
            biased;
            () = cancel.cancelled() => true,
            () = self.drive_turn(&turn_id, &text, &cancel, &clock) => cancel.is_cancelled(),
        };
        if interrupted {
            info!(turn_id = %turn_id, "turn cancelled");
        }

        let metrics = clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(&turn_id, Instant::now(), interrupted);
        info!(
            turn_id = %turn_id,
            e2e_latency_ms = ?metrics.e2e_latency_ms,
            turn_total_ms = metrics.turn_total_ms,
            tool_calls = metrics.tool_calls,
            "turn finished"
        );
        self.send(ServerMessage::Metrics(metrics));
        self.send(ServerMessage::Turn {
            event: TurnEvent::Finished,
            turn_id,
            text: None,
        });
        self.completed_turns.fetch_add(1, Ordering::SeqCst);
        *self.turn.lock().unwrap_or_else(PoisonError::into_inner) = None;

        if self.running.load(Ordering::SeqCst) {
            self.set_state(SessionState::Listening);
        }
    }

    /// Reasoning loop, token relay and audio pump running together.
    async fn drive_turn(
        &self,
        turn_id: &str,
        text: &str,
        cancel: &CancellationToken,
        clock: &Mutex<TurnClock>,
    ) {
        let (agent_tx, mut agent_rx) = mpsc::unbounded_channel::<AgentOutput>();
        let (text_tx, text_rx) = mpsc::unbounded_channel::<String>();

        self.status(Service::Tts, ConnectionState::Connected, None);
        let mut speech = self.tts.stream_speech(text_rx);

        let reason = async move {
            let mut agent = self.agent.lock().await;
            let result = agent.run_turn(text, &agent_tx, cancel).await;
            drop(agent_tx);
            match result {
                Ok(summary) => debug!(
                    turn_id = %turn_id,
                    stop = ?summary.stop,
                    model_calls = summary.model_calls,
                    tool_calls = summary.tool_calls,
                    "reasoning finished"
                ),
                Err(e) => {
                    error!(turn_id = %turn_id, error = %e, "agent failed");
                    self.status(Service::Llm, ConnectionState::Error, Some(e.to_string()));
                    self.send(ServerMessage::Error {
                        message: format!("Agent failed: {e}"),
                        turn_id: Some(turn_id.to_string()),
                    });
                }
            }
        };

        let relay = async move {
            while let Some(item) = agent_rx.recv().await {
                match item {
                    AgentOutput::Token(token) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        self.set_state(SessionState::Speaking);
                        let (token_index, elapsed_ms) = clock
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .on_token(Instant::now());
                        self.send(ServerMessage::Llm {
                            turn_id: turn_id.to_string(),
                            text: token.clone(),
                            done: false,
                            token_index,
                            elapsed_ms,
                        });
                        let _ = text_tx.send(token);
                    }
                    AgentOutput::Event(event) => self.on_agent_event(turn_id, event, clock),
                }
            }

            let (token_index, elapsed_ms) = clock
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .token_span();
            info!(turn_id = %turn_id, tokens = token_index, "agent stream finished");
            self.send(ServerMessage::Llm {
                turn_id: turn_id.to_string(),
                text: String::new(),
                done: true,
                token_index,
                elapsed_ms,
            });
            // Closing the text channel lets the synthesizer finish.
            drop(text_tx);
        };

        let pump = async {
            while let Some(pcm) = speech.next_chunk().await {
                if cancel.is_cancelled() {
                    break;
                }
                clock
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_audio(pcm.len(), Instant::now());
                self.send_audio(pcm);
            }
        };

        tokio::join!(reason, relay, pump);

        if cancel.is_cancelled() {
            return;
        }
        match speech.take_failure() {
            Some(e) => {
                error!(turn_id = %turn_id, error = %e, "speech synthesis failed");
                let detail = format!("{}: {e}", e.kind());
                self.status(Service::Tts, ConnectionState::Error, Some(detail.clone()));
                self.send(ServerMessage::Error {
                    message: format!("TTS failed: {detail}"),
                    turn_id: Some(turn_id.to_string()),
                });
            }
            None => {
                info!(turn_id = %turn_id, "speech finished");
                self.status(Service::Tts, ConnectionState::Idle, None);
            }
        }
    }

    fn on_agent_event(&self, turn_id: &str, event: AgentEvent, clock: &Mutex<TurnClock>) {
        match event {
            AgentEvent::Thinking { round, final_call } => {
                debug!(turn_id = %turn_id, round, final_call, "model call");
                self.set_state(SessionState::Thinking);
            }
            AgentEvent::ToolStart {
                tool_call_id,
                name,
                arguments,
            } => {
                clock
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_tool_call();
                self.set_state(SessionState::Executing);
                self.send(ServerMessage::Tool {
                    event: ToolPhase::Start,
                    turn_id: turn_id.to_string(),
                    tool_call_id,
                    name,
                    arguments: Some(arguments),
                    content: None,
                    is_error: None,
                    elapsed_ms: None,
                });
            }
            AgentEvent::ToolResult {
                tool_call_id,
                name,
                content,
                is_error,
                elapsed_ms,
            } => {
                self.send(ServerMessage::Tool {
                    event: ToolPhase::Result,
                    turn_id: turn_id.to_string(),
                    tool_call_id,
                    name,
                    arguments: None,
                    content: Some(content),
                    is_error: Some(is_error),
                    elapsed_ms: Some(elapsed_ms),
                });
                self.set_state(SessionState::Thinking);
            }
            AgentEvent::SkillChanged {
                action,
                skill_name,
                skills,
            } => {
                self.send(ServerMessage::Skill {
                    event: action,
                    name: skill_name,
                    skills,
                });
            }
        }
    }
}

/// Fresh turn id.
pub fn new_turn_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(TURN_ID_LEN);
    id
}

async fn session_loop(
    shared: Arc<Shared>,
    audio_rx: mpsc::UnboundedReceiver<AudioFrame>,
    cancel: CancellationToken,
) {
    info!("session loop started");
    shared.set_state(SessionState::Listening);
    shared.send(ServerMessage::SkillsList {
        skills: shared.skill_infos(),
    });

    let connection = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            shared.running.store(false, Ordering::SeqCst);
            shared.set_state(SessionState::Idle);
            return;
        }
        result = shared.asr.connect() => result,
    };
    let AsrConnection {
        audio,
        transcripts,
        mut utterances,
        handle,
    } = match connection {
        Ok(connection) => connection,
        Err(e) => {
            error!(error = %e, "ASR connect failed");
            let detail = format!("{}: {e}", e.kind());
            shared.status(Service::Asr, ConnectionState::Error, Some(detail.clone()));
            shared.send(ServerMessage::error(format!("ASR connection failed: {detail}")));
            shared.running.store(false, Ordering::SeqCst);
            shared.set_state(SessionState::Idle);
            return;
        }
    };
    info!(provider = shared.asr.name(), "ASR connected");
    shared.status(Service::Asr, ConnectionState::Connected, None);
    shared.status(Service::Tts, ConnectionState::Idle, None);
    shared.status(Service::Llm, ConnectionState::Connected, None);

    let forward_audio = tokio::spawn(forward_audio(audio_rx, audio));
    let forward_text = tokio::spawn(forward_transcripts(shared.clone(), transcripts));

    let mut gate = UtteranceGate::new(Duration::from_millis(shared.config.dedup_window_ms));
    let poll = Duration::from_millis(shared.config.utterance_poll_ms.max(1));
    let mut asr_failed = false;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("session loop cancelled");
                break;
            }
            next = tokio::time::timeout(poll, utterances.recv()) => next,
        };
        let utterance = match next {
            Err(_) => continue,
            Ok(None) => {
                match handle.take_failure() {
                    Some(e) => {
                        error!(error = %e, "ASR stream failed");
                        let detail = format!("{}: {e}", e.kind());
                        shared.status(Service::Asr, ConnectionState::Error, Some(detail.clone()));
                        shared.send(ServerMessage::error(format!("ASR stream failed: {detail}")));
                        asr_failed = true;
                    }
                    None => warn!("ASR stream ended"),
                }
                break;
            }
            Ok(Some(utterance)) => utterance,
        };
        let Some(text) = gate.admit(&utterance, Instant::now()) else {
            continue;
        };

        let turn_id = new_turn_id();
        info!(turn_id = %turn_id, text = %text, "utterance committed");
        shared.send(ServerMessage::Turn {
            event: TurnEvent::UserCommitted,
            turn_id: turn_id.clone(),
            text: Some(text.clone()),
        });
        shared.run_turn(turn_id, text, &cancel).await;
    }

    shared.running.store(false, Ordering::SeqCst);
    if !asr_failed {
        shared.status(Service::Asr, ConnectionState::Disconnected, None);
    }
    shared.status(Service::Tts, ConnectionState::Disconnected, None);
    shared.status(Service::Llm, ConnectionState::Disconnected, None);
    forward_audio.abort();
    forward_text.abort();
    let _ = forward_audio.await;
    let _ = forward_text.await;
    handle.close().await;
    shared.set_state(SessionState::Idle);
    info!("session loop finished");
}

/// Relay client audio to the speech channel until the end marker.
async fn forward_audio(mut audio_rx: mpsc::UnboundedReceiver<AudioFrame>, asr: AudioSink) {
    while let Some(frame) = audio_rx.recv().await {
        match frame {
            AudioFrame::Chunk(chunk) => {
                if !asr.send(chunk) {
                    return;
                }
            }
            AudioFrame::End => break,
        }
    }
    asr.end();
}

async fn forward_transcripts(
    shared: Arc<Shared>,
    mut transcripts: mpsc::UnboundedReceiver<TranscriptFragment>,
) {
    while let Some(fragment) = transcripts.recv().await {
        if fragment.is_final {
            debug!(text = %fragment.text, "ASR stable transcript");
        }
        shared.send(ServerMessage::Asr {
            text: fragment.text,
            is_final: fragment.is_final,
        });
    }
}
