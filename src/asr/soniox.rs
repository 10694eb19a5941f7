//! Soniox realtime transcription over WebSocket.
//!
//! The session opens with a JSON config frame, then streams binary PCM
//! frames; an empty text frame ends the audio. Responses carry token
//! batches, the `<end>` endpoint marker, a `finished` flag and
//! `error_code`/`error_message` on failure.
//!
//! When a proxy is configured (or found in `HTTPS_PROXY` / `ALL_PROXY`),
//! the connection is first tunnelled through it with HTTP `CONNECT`; if
//! that fails the connection is retried once directly.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::transcript::{AsrToken, TranscriptAssembler, TranscriptFragment};
use super::{AsrConnection, AsrHandle, AudioFrame, AudioSink, FailureSlot, SpeechChannel};
use crate::config::AsrConfig;
use crate::error::{Result, SpeechError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MAX_PROXY_RESPONSE: usize = 8 * 1024;

/// One server response.
#[derive(Debug, Default, Deserialize)]
pub struct SonioxResponse {
    #[serde(default)]
    pub tokens: Vec<AsrToken>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub error_code: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Soniox realtime client.
#[derive(Debug, Clone)]
pub struct SonioxClient {
    config: AsrConfig,
    proxy: Option<String>,
}

impl SonioxClient {
    /// Create a client. The proxy comes from the config, then the environment.
    pub fn new(config: AsrConfig) -> Self {
        let proxy = config
            .proxy
            .clone()
            .or_else(|| proxy_from_env(|key| std::env::var(key).ok()));
        Self { config, proxy }
    }

    /// First session frame.
    pub fn config_frame(&self) -> serde_json::Value {
        serde_json::json!({
            "api_key": self.config.api_key,
            "model": self.config.model,
            "language_hints": self.config.language_hints,
            "enable_language_identification": false,
            "enable_speaker_diarization": false,
            "enable_endpoint_detection": true,
            "audio_format": "pcm_s16le",
            "sample_rate": self.config.sample_rate,
            "num_channels": self.config.num_channels,
        })
    }

    async fn open(&self) -> Result<WsStream> {
        let budget = Duration::from_millis(self.config.connect_timeout_ms);

        if let Some(proxy) = &self.proxy {
            tracing::info!(url = %self.config.ws_url, proxy = %proxy, "connecting ASR websocket via proxy");
            match tokio::time::timeout(budget, self.open_via_proxy(proxy)).await {
                Ok(Ok(ws)) => return Ok(ws),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "ASR connect through proxy failed, retrying direct");
                }
                Err(_) => {
                    tracing::warn!("ASR connect through proxy timed out, retrying direct");
                }
            }
        }

        tracing::info!(url = %self.config.ws_url, "connecting ASR websocket");
        match tokio::time::timeout(budget, self.open_direct()).await {
            Ok(result) => result,
            Err(_) => Err(connection_error(format!(
                "timed out after {}ms",
                self.config.connect_timeout_ms
            ))),
        }
    }

    async fn open_direct(&self) -> Result<WsStream> {
        let handshake = tokio_tungstenite::connect_async(self.config.ws_url.as_str());
        let (ws, _) = tokio::time::timeout(self.open_timeout(), handshake)
            .await
            .map_err(|_| connection_error("websocket handshake timed out"))?
            .map_err(|e| connection_error(e.to_string()))?;
        Ok(ws)
    }

    async fn open_via_proxy(&self, proxy: &str) -> Result<WsStream> {
        let target = Url::parse(&self.config.ws_url)
            .map_err(|e| connection_error(format!("invalid ASR url: {e}")))?;
        let host = target
            .host_str()
            .ok_or_else(|| connection_error("ASR url has no host"))?;
        let port = target.port_or_known_default().unwrap_or(443);

        let tunnel = open_tunnel(proxy, host, port)
            .await
            .map_err(|e| connection_error(format!("proxy tunnel: {e}")))?;
        let handshake = tokio_tungstenite::client_async_tls(self.config.ws_url.as_str(), tunnel);
        let (ws, _) = tokio::time::timeout(self.open_timeout(), handshake)
            .await
            .map_err(|_| connection_error("websocket handshake timed out"))?
            .map_err(|e| connection_error(e.to_string()))?;
        Ok(ws)
    }

    fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.config.open_timeout_ms)
    }
}

#[async_trait]
impl SpeechChannel for SonioxClient {
    fn name(&self) -> &str {
        "soniox"
    }

    async fn connect(&self) -> Result<AsrConnection> {
        let ws = self.open().await?;
        tracing::info!("ASR websocket connected");

        let (mut write, read) = ws.split();
        write
            .send(Message::Text(self.config_frame().to_string()))
            .await
            .map_err(|e| connection_error(format!("send config: {e}")))?;
        tracing::info!(model = %self.config.model, "ASR config sent");

        let cancel = CancellationToken::new();
        let failure = FailureSlot::new();
        let (audio, audio_rx) = AudioSink::channel();
        let (transcript_tx, transcripts) = mpsc::unbounded_channel();
        let (utterance_tx, utterances) = mpsc::unbounded_channel();

        let pump = tokio::spawn(pump_audio(
            write,
            audio_rx,
            Duration::from_secs(self.config.keepalive_secs.max(1)),
            Duration::from_millis(self.config.close_timeout_ms),
            cancel.clone(),
        ));
        let reader = tokio::spawn(read_responses(
            read,
            transcript_tx,
            utterance_tx,
            cancel.clone(),
            failure.clone(),
        ));

        Ok(AsrConnection {
            audio,
            transcripts,
            utterances,
            handle: AsrHandle::new(cancel, vec![pump, reader], failure),
        })
    }
}

/// Forward queued audio until the end marker, keeping the socket alive with pings.
async fn pump_audio(
    mut write: SplitSink<WsStream, Message>,
    mut audio_rx: mpsc::UnboundedReceiver<AudioFrame>,
    keepalive: Duration,
    close_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(keepalive);
    ping.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = audio_rx.recv() => match frame {
                Some(AudioFrame::Chunk(chunk)) => {
                    if let Err(e) = write.send(Message::Binary(chunk.to_vec())).await {
                        tracing::warn!(error = %e, "ASR audio send failed");
                        return;
                    }
                }
                Some(AudioFrame::End) | None => {
                    // An empty text frame tells the server the audio is over.
                    if let Err(e) = write.send(Message::Text(String::new())).await {
                        tracing::debug!(error = %e, "ASR end-of-audio send failed");
                    }
                    tracing::info!("ASR audio stream ended");
                    break;
                }
            },
            _ = ping.tick() => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    tracing::warn!(error = %e, "ASR keepalive failed");
                    return;
                }
            }
        }
    }

    // Wait for the reader to see `finished` unless the whole connection is closing.
    cancel.cancelled().await;
    if tokio::time::timeout(close_timeout, write.close()).await.is_err() {
        tracing::debug!("ASR websocket close timed out");
    }
}

/// Parse responses into transcripts and utterances until the stream ends.
///
/// An upstream error, a read failure or a close before `finished` is
/// recorded in `failure`; the pending utterance is flushed either way.
async fn read_responses(
    mut read: SplitStream<WsStream>,
    transcript_tx: mpsc::UnboundedSender<TranscriptFragment>,
    utterance_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    failure: FailureSlot,
) {
    let mut assembler = TranscriptAssembler::new();

    loop {
        let msg = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!("ASR reader cancelled");
                break;
            }
            msg = read.next() => msg,
        };

        let text = match msg {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                tracing::warn!("ASR websocket closed before the stream finished");
                failure.set(SpeechError::Asr("websocket closed by server".into()));
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "ASR websocket read failed");
                failure.set(SpeechError::Asr(format!("websocket read failed: {e}")));
                break;
            }
            Some(Ok(_)) => continue,
        };

        let response: SonioxResponse = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unparseable ASR message");
                continue;
            }
        };

        if let Some(code) = &response.error_code {
            let message = response.error_message.as_deref().unwrap_or_default();
            tracing::error!(code = %code, message, "Soniox ASR error");
            failure.set(SpeechError::Asr(format!("{code}: {message}")));
            break;
        }

        let batch = assembler.push(&response.tokens);
        if let Some(fragment) = batch.fragment {
            let _ = transcript_tx.send(fragment);
        }
        if let Some(utterance) = batch.utterance {
            tracing::info!(chars = utterance.chars().count(), "ASR endpoint utterance");
            let _ = utterance_tx.send(utterance);
        }
        if response.finished {
            tracing::info!("ASR stream finished");
            break;
        }
    }

    if let Some(utterance) = assembler.flush() {
        tracing::info!(chars = utterance.chars().count(), "ASR flushed utterance at stream end");
        let _ = utterance_tx.send(utterance);
    }
}

/// Open an HTTP `CONNECT` tunnel to `host:port` through `proxy`.
async fn open_tunnel(proxy: &str, host: &str, port: u16) -> std::io::Result<TcpStream> {
    let proxy_url = Url::parse(proxy).map_err(std::io::Error::other)?;
    let proxy_host = proxy_url
        .host_str()
        .ok_or_else(|| std::io::Error::other("proxy url has no host"))?;
    let proxy_port = proxy_url.port_or_known_default().unwrap_or(8080);

    let mut stream = TcpStream::connect((proxy_host, proxy_port)).await?;
    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut response = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        response.push(byte[0]);
        if response.len() > MAX_PROXY_RESPONSE {
            return Err(std::io::Error::other("proxy response too large"));
        }
    }

    let head = String::from_utf8_lossy(&response);
    let status = head.split_whitespace().nth(1).unwrap_or_default();
    if status != "200" {
        let line = head.lines().next().unwrap_or_default().to_string();
        return Err(std::io::Error::other(format!("proxy refused tunnel: {line}")));
    }
    Ok(stream)
}

/// HTTP proxy from the environment. SOCKS proxies are not supported and are skipped.
pub fn proxy_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    ["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]
        .iter()
        .filter_map(|key| lookup(key))
        .map(|v| v.trim().to_string())
        .find(|v| v.starts_with("http://") || v.starts_with("https://"))
}

fn connection_error(detail: impl Into<String>) -> SpeechError {
    SpeechError::Connection {
        service: "asr",
        detail: detail.into(),
    }
}
