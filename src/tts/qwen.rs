//! Qwen realtime TTS (DashScope) on a dedicated worker thread.
//!
//! The realtime endpoint is driven with a blocking WebSocket owned by one
//! OS thread per synthesis call. Two queues cross the thread boundary:
//!
//! - text: a crossbeam channel fed by an async adapter task that drains
//!   the caller's text and ends with [`TextCommand::Finish`]
//! - audio: an unbounded Tokio channel of [`AudioItem`]s, fed by the
//!   worker as audio deltas arrive and ended with `End`, or with `Failed`
//!   when the connection could not be opened or broke mid-stream
//!
//! The worker polls both the text queue and the socket (the socket has a
//! short read timeout), so it notices cancellation within one poll
//! interval. Cancellation sets the stream's flag, which makes the worker
//! send `response.cancel` and close the socket, and pushes the audio
//! sentinel straight away so the consumer never waits on the worker.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use crossbeam_channel::{Receiver, TryRecvError};
use tokio::sync::mpsc;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::{AudioItem, AudioSender, SpeechStream, SpeechSynthesizer};
use crate::config::TtsConfig;
use crate::error::{Result, SpeechError};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Item on the text queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextCommand {
    /// Text to synthesize.
    Append(String),
    /// No more text; flush and finish the session.
    Finish,
}

/// A server event the worker acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Decoded PCM.
    Audio(Bytes),
    /// The session is complete; no more audio will arrive.
    Finished,
    /// Upstream error.
    Error(String),
    /// Anything else (`session.created`, `response.done`, ...).
    Other(String),
}

/// Parse one server text frame.
pub fn parse_server_event(raw: &str) -> Result<ServerEvent> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| SpeechError::Tts(format!("bad event: {e}")))?;
    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    match kind {
        "response.audio.delta" => {
            let delta = value
                .get("delta")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let pcm = BASE64
                .decode(delta)
                .map_err(|e| SpeechError::Tts(format!("bad audio delta: {e}")))?;
            Ok(ServerEvent::Audio(Bytes::from(pcm)))
        }
        "session.finished" => Ok(ServerEvent::Finished),
        "error" => {
            let message = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            Ok(ServerEvent::Error(message))
        }
        other => Ok(ServerEvent::Other(other.to_string())),
    }
}

/// `session.update` selecting voice and output format.
pub fn session_update_event(config: &TtsConfig) -> serde_json::Value {
    serde_json::json!({
        "event_id": event_id(),
        "type": "session.update",
        "session": {
            "voice": config.voice,
            "response_format": "pcm",
            "sample_rate": config.sample_rate,
            "mode": "server_commit",
        }
    })
}

/// `input_text_buffer.append` carrying one text chunk.
pub fn append_text_event(text: &str) -> serde_json::Value {
    serde_json::json!({
        "event_id": event_id(),
        "type": "input_text_buffer.append",
        "text": text,
    })
}

fn simple_event(kind: &str) -> serde_json::Value {
    serde_json::json!({ "event_id": event_id(), "type": kind })
}

fn event_id() -> String {
    format!("event_{}", uuid::Uuid::new_v4().simple())
}

/// State of the stream currently being synthesized.
struct ActiveStream {
    id: u64,
    cancel: Arc<AtomicBool>,
    audio_tx: AudioSender,
}

/// Qwen realtime synthesizer.
pub struct QwenSynthesizer {
    config: TtsConfig,
    active: Arc<Mutex<Option<ActiveStream>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for QwenSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QwenSynthesizer")
            .field("model", &self.config.model)
            .field("voice", &self.config.voice)
            .finish_non_exhaustive()
    }
}

impl QwenSynthesizer {
    pub fn new(config: TtsConfig) -> Self {
        Self {
            config,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether a synthesis call is in progress.
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl SpeechSynthesizer for QwenSynthesizer {
    fn name(&self) -> &str {
        "qwen-tts"
    }

    fn stream_speech(&self, mut text: mpsc::UnboundedReceiver<String>) -> SpeechStream {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(AtomicBool::new(false));
        let (audio_tx, stream) = SpeechStream::channel();
        let (text_tx, text_rx) = crossbeam_channel::unbounded::<TextCommand>();

        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(ActiveStream {
            id,
            cancel: cancel.clone(),
            audio_tx: audio_tx.clone(),
        });

        let feeder_cancel = cancel.clone();
        let feeder = tokio::spawn(async move {
            while let Some(chunk) = text.recv().await {
                if feeder_cancel.load(Ordering::SeqCst) {
                    break;
                }
                if text_tx.send(TextCommand::Append(chunk)).is_err() {
                    return;
                }
            }
            let _ = text_tx.send(TextCommand::Finish);
        });

        let worker_config = self.config.clone();
        let worker_cancel = cancel.clone();
        let worker_audio = audio_tx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("tts-worker-{id}"))
            .spawn(move || run_worker(&worker_config, &text_rx, &worker_audio, &worker_cancel));
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn TTS worker thread");
            let _ = audio_tx.send(AudioItem::Failed(SpeechError::Tts(format!(
                "worker thread: {e}"
            ))));
        }

        let active = self.active.clone();
        stream.with_cleanup(move || {
            cancel.store(true, Ordering::SeqCst);
            feeder.abort();
            let mut slot = active.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|s| s.id == id) {
                *slot = None;
            }
        })
    }

    fn cancel(&self) {
        let slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(stream) = slot.as_ref() else {
            return;
        };
        stream.cancel.store(true, Ordering::SeqCst);
        // The worker may be blocked on the network; end the consumer now.
        let _ = stream.audio_tx.send(AudioItem::End);
        tracing::info!(stream = stream.id, "TTS cancel requested");
    }
}

/// Worker thread body. Always ends the audio stream.
fn run_worker(
    config: &TtsConfig,
    text_rx: &Receiver<TextCommand>,
    audio_tx: &AudioSender,
    cancel: &AtomicBool,
) {
    let end = match synthesize(config, text_rx, audio_tx, cancel) {
        Ok(()) => AudioItem::End,
        Err(e) if cancel.load(Ordering::SeqCst) => {
            tracing::debug!(error = %e, "TTS worker stopped after cancel");
            AudioItem::End
        }
        Err(e) => {
            tracing::error!(error = %e, "TTS worker failed");
            AudioItem::Failed(e)
        }
    };
    let _ = audio_tx.send(end);
}

fn synthesize(
    config: &TtsConfig,
    text_rx: &Receiver<TextCommand>,
    audio_tx: &AudioSender,
    cancel: &AtomicBool,
) -> Result<()> {
    let mut socket = connect(config)?;
    set_read_timeout(&socket, Duration::from_millis(config.text_poll_ms.max(1)));
    send_event(&mut socket, &session_update_event(config))?;
    tracing::info!(voice = %config.voice, "TTS session updated");

    let finish_timeout = Duration::from_secs(config.finish_timeout_secs);
    let mut finish_sent: Option<Instant> = None;
    let mut chunks_sent = 0usize;

    loop {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!("TTS worker: cancel detected");
            let _ = send_event(&mut socket, &simple_event("response.cancel"));
            let _ = socket.close(None);
            let _ = socket.flush();
            return Ok(());
        }

        if finish_sent.is_none() {
            loop {
                match text_rx.try_recv() {
                    Ok(TextCommand::Append(text)) => {
                        if !text.trim().is_empty() {
                            send_event(&mut socket, &append_text_event(&text))?;
                            chunks_sent += 1;
                        }
                    }
                    Ok(TextCommand::Finish) | Err(TryRecvError::Disconnected) => {
                        send_event(&mut socket, &simple_event("session.finish"))?;
                        tracing::debug!(chunks_sent, "TTS text complete, waiting for audio");
                        finish_sent = Some(Instant::now());
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }
        } else if finish_sent.is_some_and(|at| at.elapsed() > finish_timeout) {
            tracing::warn!(
                timeout_secs = config.finish_timeout_secs,
                "TTS session did not finish in time"
            );
            let _ = socket.close(None);
            return Ok(());
        }

        let frame = match socket.read() {
            Ok(Message::Text(raw)) => raw,
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "TTS websocket closed by server");
                return Err(SpeechError::Tts(
                    "websocket closed before the session finished".into(),
                ));
            }
            Ok(_) => continue,
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                continue;
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return Err(SpeechError::Tts(
                    "websocket closed before the session finished".into(),
                ));
            }
            Err(e) => return Err(SpeechError::Tts(format!("read: {e}"))),
        };

        match parse_server_event(&frame) {
            Ok(ServerEvent::Audio(pcm)) => {
                if !cancel.load(Ordering::SeqCst) && !pcm.is_empty() {
                    let _ = audio_tx.send(AudioItem::Chunk(pcm));
                }
            }
            Ok(ServerEvent::Finished) => {
                tracing::info!("TTS session finished");
                let _ = socket.close(None);
                return Ok(());
            }
            Ok(ServerEvent::Error(message)) => return Err(SpeechError::Tts(message)),
            Ok(ServerEvent::Other(kind)) => tracing::trace!(event = %kind, "TTS event"),
            Err(e) => tracing::debug!(error = %e, "ignoring TTS event"),
        }
    }
}

fn connect(config: &TtsConfig) -> Result<Socket> {
    let url = format!("{}?model={}", config.ws_url, config.model);
    let mut request = url
        .into_client_request()
        .map_err(|e| tts_connection_error(e.to_string()))?;
    if !config.api_key.is_empty() {
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| tts_connection_error(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);
    }

    tracing::info!(url = %config.ws_url, model = %config.model, "connecting TTS websocket");
    let (socket, _) =
        tungstenite::connect(request).map_err(|e| tts_connection_error(e.to_string()))?;
    Ok(socket)
}

fn set_read_timeout(socket: &Socket, timeout: Duration) {
    let result = match socket.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.set_read_timeout(Some(timeout)),
        MaybeTlsStream::Rustls(tls) => tls.get_ref().set_read_timeout(Some(timeout)),
        _ => Ok(()),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to set TTS socket read timeout");
    }
}

fn send_event(socket: &mut Socket, event: &serde_json::Value) -> Result<()> {
    socket
        .send(Message::Text(event.to_string()))
        .map_err(|e| SpeechError::Tts(format!("send: {e}")))
}

fn tts_connection_error(detail: String) -> SpeechError {
    SpeechError::Connection {
        service: "tts",
        detail,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use std::net::TcpListener;

    use super::*;

    #[test]
    fn parses_audio_delta() {
        let raw = serde_json::json!({
            "type": "response.audio.delta",
            "delta": BASE64.encode([1u8, 2, 3, 4]),
        })
        .to_string();
        assert_eq!(
            parse_server_event(&raw).unwrap(),
            ServerEvent::Audio(Bytes::from_static(&[1, 2, 3, 4]))
        );
    }

    #[test]
    fn parses_control_events() {
        assert_eq!(
            parse_server_event(r#"{"type":"session.finished"}"#).unwrap(),
            ServerEvent::Finished
        );
        assert_eq!(
            parse_server_event(r#"{"type":"error","error":{"message":"quota"}}"#).unwrap(),
            ServerEvent::Error("quota".into())
        );
        assert_eq!(
            parse_server_event(r#"{"type":"session.created"}"#).unwrap(),
            ServerEvent::Other("session.created".into())
        );
        assert!(parse_server_event("not json").is_err());
    }

    #[test]
    fn session_update_uses_server_commit() {
        let event = session_update_event(&TtsConfig::default());
        assert_eq!(event["type"], "session.update");
        assert_eq!(event["session"]["mode"], "server_commit");
        assert_eq!(event["session"]["response_format"], "pcm");
        assert_eq!(event["session"]["sample_rate"], 24_000);
        assert!(event["event_id"].as_str().unwrap().starts_with("event_"));
        assert_eq!(append_text_event("你好")["text"], "你好");
    }

    /// Minimal realtime server: one audio delta per appended chunk, then
    /// `session.finished` on `session.finish`.
    fn spawn_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            loop {
                let Ok(msg) = ws.read() else { return };
                let Message::Text(raw) = msg else { continue };
                let event: serde_json::Value = serde_json::from_str(&raw).unwrap();
                match event["type"].as_str().unwrap() {
                    "input_text_buffer.append" => {
                        let pcm = event["text"].as_str().unwrap().as_bytes().to_vec();
                        let reply = serde_json::json!({
                            "type": "response.audio.delta",
                            "delta": BASE64.encode(pcm),
                        });
                        ws.send(Message::Text(reply.to_string())).unwrap();
                    }
                    "session.finish" => {
                        let reply = serde_json::json!({"type": "session.finished"});
                        ws.send(Message::Text(reply.to_string())).unwrap();
                    }
                    _ => {}
                }
            }
        });
        format!("ws://{addr}/realtime")
    }

    #[tokio::test]
    async fn streams_audio_from_worker() {
        let synth = QwenSynthesizer::new(TtsConfig {
            ws_url: spawn_server(),
            api_key: "k".into(),
            ..TtsConfig::default()
        });
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        let mut stream = synth.stream_speech(text_rx);
        assert!(synth.is_active());

        text_tx.send("ab".to_string()).unwrap();
        text_tx.send("  ".to_string()).unwrap();
        text_tx.send("cd".to_string()).unwrap();
        drop(text_tx);

        let mut audio = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            audio.extend_from_slice(&chunk);
        }
        assert_eq!(audio, b"abcd");
        drop(stream);
        assert!(!synth.is_active());
    }

    #[tokio::test]
    async fn cancel_ends_stream_immediately() {
        let synth = QwenSynthesizer::new(TtsConfig {
            ws_url: spawn_server(),
            ..TtsConfig::default()
        });
        let (_text_tx, text_rx) = mpsc::unbounded_channel::<String>();
        let mut stream = synth.stream_speech(text_rx);
        synth.cancel();
        let next = tokio::time::timeout(Duration::from_secs(2), stream.next_chunk())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(stream.take_failure().is_none());
    }

    #[test]
    fn cancel_without_stream_is_noop() {
        let synth = QwenSynthesizer::new(TtsConfig::default());
        synth.cancel();
        assert!(!synth.is_active());
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_stream() {
        let synth = QwenSynthesizer::new(TtsConfig {
            ws_url: "ws://127.0.0.1:1/realtime".into(),
            ..TtsConfig::default()
        });
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        let mut stream = synth.stream_speech(text_rx);
        text_tx.send("你好".to_string()).unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next_chunk())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(matches!(
            stream.take_failure(),
            Some(SpeechError::Connection { service: "tts", .. })
        ));
    }

    #[tokio::test]
    async fn upstream_error_event_fails_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            while let Ok(msg) = ws.read() {
                let Message::Text(raw) = msg else { continue };
                if raw.contains("input_text_buffer.append") {
                    let reply = serde_json::json!({
                        "type": "error",
                        "error": {"message": "voice not found"},
                    });
                    ws.send(Message::Text(reply.to_string())).unwrap();
                }
            }
        });

        let synth = QwenSynthesizer::new(TtsConfig {
            ws_url: format!("ws://{addr}/realtime"),
            ..TtsConfig::default()
        });
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        let mut stream = synth.stream_speech(text_rx);
        text_tx.send("你好".to_string()).unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next_chunk())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(matches!(
            stream.take_failure(),
            Some(SpeechError::Tts(m)) if m == "voice not found"
        ));
    }
}
