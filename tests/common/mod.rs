//! Shared mocks for session-level integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tinyagent::agent::{PromptContext, ReasoningLoop};
use tinyagent::asr::{AsrConnection, AsrHandle, AudioFrame, AudioSink, FailureSlot, SpeechChannel};
use tinyagent::config::{AgentLoopConfig, SessionConfig};
use tinyagent::error::{Result, SpeechError};
use tinyagent::llm::{
    FinishReason, LlmError, LlmEvent, LlmEventStream, Message, ProviderAdapter, RequestOptions,
    ToolDefinition,
};
use tinyagent::pipeline::{Outbound, ServerMessage, SessionParts, SessionState, VoiceSession};
use tinyagent::skills::SkillManager;
use tinyagent::soul::SoulStore;
use tinyagent::tools::{CalculateTool, DateTimeTool, Tool, ToolRegistry, ToolResult};
use tinyagent::tts::{AudioItem, AudioSender, SpeechStream, SpeechSynthesizer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(5);

// ── Scripted provider ─────────────────────────────────────────

/// One scripted model response.
pub enum Script {
    /// Stream these events, then end.
    Events(Vec<LlmEvent>),
    /// Stream these events, then never finish.
    Stall(Vec<LlmEvent>),
    /// Fail the request.
    Fail(String),
}

pub fn text(parts: &[&str]) -> Script {
    let mut events: Vec<LlmEvent> = parts
        .iter()
        .map(|t| LlmEvent::TextDelta {
            text: (*t).to_string(),
        })
        .collect();
    events.push(LlmEvent::StreamEnd {
        finish_reason: FinishReason::Stop,
    });
    Script::Events(events)
}

pub fn tool_call(id: &str, name: &str, args: &str) -> Script {
    Script::Events(vec![
        LlmEvent::ToolCallDelta {
            index: 0,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            args_fragment: Some(args.to_string()),
        },
        LlmEvent::StreamEnd {
            finish_reason: FinishReason::ToolCalls,
        },
    ])
}

/// Text written alongside a tool call in the same response.
pub fn chatty_tool_call(preamble: &str, id: &str, name: &str, args: &str) -> Script {
    Script::Events(vec![
        LlmEvent::TextDelta {
            text: preamble.to_string(),
        },
        LlmEvent::ToolCallDelta {
            index: 0,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            args_fragment: Some(args.to_string()),
        },
        LlmEvent::StreamEnd {
            finish_reason: FinishReason::ToolCalls,
        },
    ])
}

/// Replays scripted responses and records what it was sent.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    pub tool_counts: Mutex<Vec<usize>>,
    pub requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        messages: &[Message],
        _options: &RequestOptions,
        tools: &[ToolDefinition],
    ) -> std::result::Result<LlmEventStream, LlmError> {
        self.tool_counts.lock().unwrap().push(tools.len());
        self.requests.lock().unwrap().push(messages.to_vec());
        let next = self.scripts.lock().unwrap().pop_front();
        match next {
            Some(Script::Events(events)) => {
                Ok(Box::pin(futures_util::stream::iter(events)) as LlmEventStream)
            }
            Some(Script::Stall(events)) => {
                use futures_util::StreamExt;
                Ok(Box::pin(
                    futures_util::stream::iter(events).chain(futures_util::stream::pending()),
                ) as LlmEventStream)
            }
            Some(Script::Fail(reason)) => Err(LlmError::Transport(reason)),
            None => Err(LlmError::Transport("script exhausted".into())),
        }
    }
}

// ── Scripted speech channel ───────────────────────────────────

/// Speech channel whose committed utterances come from the test.
pub struct ScriptedChannel {
    utterances: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    fail: bool,
    broken: CancellationToken,
    break_reason: Arc<Mutex<String>>,
    pub audio_bytes: Arc<AtomicUsize>,
}

impl ScriptedChannel {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            utterances: Mutex::new(Some(rx)),
            fail: false,
            broken: CancellationToken::new(),
            break_reason: Arc::default(),
            audio_bytes: Arc::new(AtomicUsize::new(0)),
        });
        (channel, tx)
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            utterances: Mutex::new(None),
            fail: true,
            broken: CancellationToken::new(),
            break_reason: Arc::default(),
            audio_bytes: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Fail the open stream as an upstream error would.
    pub fn break_stream(&self, reason: &str) {
        *self.break_reason.lock().unwrap() = reason.to_string();
        self.broken.cancel();
    }
}

#[async_trait]
impl SpeechChannel for ScriptedChannel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<AsrConnection> {
        if self.fail {
            return Err(SpeechError::Connection {
                service: "asr",
                detail: "connection refused".into(),
            });
        }
        let utterances = self
            .utterances
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SpeechError::Asr("already connected".into()))?;

        let (audio, mut audio_rx) = AudioSink::channel();
        let (_transcripts_tx, transcripts) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let counter = Arc::clone(&self.audio_bytes);
        let drain_cancel = cancel.clone();
        let failure = FailureSlot::new();
        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
        let mut scripted = utterances;
        let broken = self.broken.clone();
        let reason = Arc::clone(&self.break_reason);
        let relay_cancel = cancel.clone();
        let relay_failure = failure.clone();
        let relay = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = relay_cancel.cancelled() => break,
                    () = broken.cancelled() => {
                        let reason = reason.lock().unwrap().clone();
                        relay_failure.set(SpeechError::Asr(reason));
                        break;
                    }
                    next = scripted.recv() => match next {
                        Some(text) => {
                            let _ = utterance_tx.send(text);
                        }
                        None => break,
                    },
                }
            }
        });
        let drain = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = drain_cancel.cancelled() => break,
                    frame = audio_rx.recv() => match frame {
                        Some(AudioFrame::Chunk(chunk)) => {
                            counter.fetch_add(chunk.len(), Ordering::SeqCst);
                        }
                        Some(AudioFrame::End) | None => break,
                    },
                }
            }
        });

        Ok(AsrConnection {
            audio,
            transcripts,
            utterances: utterance_rx,
            handle: AsrHandle::new(cancel, vec![drain, relay], failure),
        })
    }
}

// ── Echo synthesizer ──────────────────────────────────────────

/// Synthesizer that "speaks" each text chunk as its UTF-8 bytes.
#[derive(Default)]
pub struct EchoSynthesizer {
    active: Arc<Mutex<Option<AudioSender>>>,
    failure: Option<String>,
    pub spoken: Arc<Mutex<String>>,
    pub cancels: AtomicUsize,
}

impl EchoSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Synthesizer whose upstream refuses every connection.
    pub fn unreachable(detail: &str) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(detail.to_string()),
            ..Self::default()
        })
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl SpeechSynthesizer for EchoSynthesizer {
    fn name(&self) -> &str {
        "echo"
    }

    fn stream_speech(&self, mut text: mpsc::UnboundedReceiver<String>) -> SpeechStream {
        let (tx, stream) = SpeechStream::channel();
        if let Some(detail) = &self.failure {
            let _ = tx.send(AudioItem::Failed(SpeechError::Connection {
                service: "tts",
                detail: detail.clone(),
            }));
            return stream;
        }
        *self.active.lock().unwrap() = Some(tx.clone());
        let spoken = Arc::clone(&self.spoken);
        tokio::spawn(async move {
            while let Some(chunk) = text.recv().await {
                spoken.lock().unwrap().push_str(&chunk);
                if tx.send(AudioItem::Chunk(Bytes::from(chunk.into_bytes()))).is_err() {
                    return;
                }
            }
            let _ = tx.send(AudioItem::End);
        });
        let active = Arc::clone(&self.active);
        stream.with_cleanup(move || {
            active.lock().unwrap().take();
        })
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.active.lock().unwrap().as_ref() {
            let _ = tx.send(AudioItem::End);
        }
    }
}

// ── Slow tool ─────────────────────────────────────────────────

/// Tool that blocks long enough to be interrupted.
pub struct SlowTool;

impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow_lookup"
    }

    fn description(&self) -> &str {
        "Looks something up, slowly."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn execute(&self, _args: serde_json::Value) -> std::result::Result<ToolResult, LlmError> {
        std::thread::sleep(Duration::from_millis(1500));
        Ok(ToolResult::success("done"))
    }
}

// ── Harness ───────────────────────────────────────────────────

pub struct Harness {
    pub session: VoiceSession,
    pub out: mpsc::UnboundedReceiver<Outbound>,
    pub utterances: mpsc::UnboundedSender<String>,
    pub provider: Arc<ScriptedProvider>,
    pub asr: Arc<ScriptedChannel>,
    pub tts: Arc<EchoSynthesizer>,
    pub dir: tempfile::TempDir,
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        dedup_window_ms: 2500,
        utterance_poll_ms: 50,
    }
}

pub fn write_skill(root: &Path, name: &str, description: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("SKILL.md"),
        format!("---\nname: {name}\ndescription: {description}\n---\n\nUse {name} carefully.\n"),
    )
    .unwrap();
}

pub fn harness(scripts: Vec<Script>) -> Harness {
    harness_with(scripts, AgentLoopConfig::default(), session_config())
}

pub fn harness_with(
    scripts: Vec<Script>,
    agent_config: AgentLoopConfig,
    session_config: SessionConfig,
) -> Harness {
    let (asr, utterances) = ScriptedChannel::new();
    build(
        scripts,
        agent_config,
        session_config,
        asr,
        utterances,
        EchoSynthesizer::new(),
    )
}

pub fn harness_unreachable_asr() -> Harness {
    let (_unused, utterances) = ScriptedChannel::new();
    build(
        Vec::new(),
        AgentLoopConfig::default(),
        session_config(),
        ScriptedChannel::unreachable(),
        utterances,
        EchoSynthesizer::new(),
    )
}

pub fn harness_unreachable_tts(scripts: Vec<Script>) -> Harness {
    let (asr, utterances) = ScriptedChannel::new();
    build(
        scripts,
        AgentLoopConfig::default(),
        session_config(),
        asr,
        utterances,
        EchoSynthesizer::unreachable("connection refused"),
    )
}

fn build(
    scripts: Vec<Script>,
    agent_config: AgentLoopConfig,
    session_config: SessionConfig,
    asr: Arc<ScriptedChannel>,
    utterances: mpsc::UnboundedSender<String>,
    tts: Arc<EchoSynthesizer>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let skills_dir = dir.path().join("skills");
    write_skill(&skills_dir, "weather", "Weather lookups");

    let mut skills = SkillManager::new(vec![skills_dir]);
    skills.discover();
    let skills = Arc::new(Mutex::new(skills));

    let mut soul = SoulStore::open(dir.path().join("soul")).unwrap();
    soul.load();
    let soul = Some(Arc::new(Mutex::new(soul)));

    let mut registry = ToolRegistry::new(Duration::from_secs(5));
    registry.register(Arc::new(DateTimeTool));
    registry.register(Arc::new(CalculateTool));
    registry.register(Arc::new(SlowTool));

    let provider = ScriptedProvider::new(scripts);
    let agent = ReasoningLoop::new(
        provider.clone(),
        Arc::new(registry),
        PromptContext::new(skills.clone(), soul.clone()),
        agent_config,
        RequestOptions::new(),
    );

    let (out_tx, out) = mpsc::unbounded_channel();
    let session = VoiceSession::new(
        SessionParts {
            config: session_config,
            asr: asr.clone(),
            tts: tts.clone(),
            agent,
            skills,
            soul,
        },
        out_tx,
    );

    Harness {
        session,
        out,
        utterances,
        provider,
        asr,
        tts,
        dir,
    }
}

impl Harness {
    /// Collect frames until one matches `done`; returns everything seen,
    /// including the matching frame.
    pub async fn collect_until(&mut self, done: impl Fn(&Outbound) -> bool) -> Vec<Outbound> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.out.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out; saw {seen:#?}"))
                .expect("outbound channel closed");
            let finished = done(&frame);
            seen.push(frame);
            if finished {
                return seen;
            }
        }
    }

    /// Frames arriving within `window`.
    pub async fn drain_for(&mut self, window: Duration) -> Vec<Outbound> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, self.out.recv()).await {
            seen.push(frame);
        }
        seen
    }

    /// Start the session and wait until the speech channel is connected.
    pub async fn start(&mut self) -> Vec<Outbound> {
        self.session.start_session().await;
        self.collect_until(|f| {
            matches!(
                f,
                Outbound::Json(ServerMessage::ConnectionStatus { service, status, .. })
                    if *service == tinyagent::pipeline::Service::Llm
                        && *status == tinyagent::pipeline::ConnectionState::Connected
            )
        })
        .await
    }

    pub fn say(&self, text: &str) {
        self.utterances.send(text.to_string()).unwrap();
    }

    /// Say `text` and wait for its turn to finish.
    pub async fn turn(&mut self, text: &str) -> Vec<Outbound> {
        self.say(text);
        self.collect_until(is_turn_finished).await
    }
}

pub fn is_turn_finished(frame: &Outbound) -> bool {
    matches!(
        frame,
        Outbound::Json(ServerMessage::Turn {
            event: tinyagent::pipeline::TurnEvent::Finished,
            ..
        })
    )
}

pub fn json(frames: &[Outbound]) -> Vec<&ServerMessage> {
    frames
        .iter()
        .filter_map(|f| match f {
            Outbound::Json(msg) => Some(msg),
            Outbound::Audio(_) => None,
        })
        .collect()
}

pub fn states(frames: &[Outbound]) -> Vec<SessionState> {
    json(frames)
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::State { state } => Some(*state),
            _ => None,
        })
        .collect()
}

/// Non-final `llm` token texts.
pub fn tokens(frames: &[Outbound]) -> Vec<String> {
    json(frames)
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::Llm {
                text, done: false, ..
            } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub fn audio(frames: &[Outbound]) -> Vec<u8> {
    frames
        .iter()
        .filter_map(|f| match f {
            Outbound::Audio(pcm) => Some(pcm.to_vec()),
            Outbound::Json(_) => None,
        })
        .flatten()
        .collect()
}

pub fn count_kind(frames: &[Outbound], kind: &str) -> usize {
    json(frames).into_iter().filter(|m| m.kind() == kind).count()
}
