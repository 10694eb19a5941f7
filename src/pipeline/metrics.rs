//! Per-turn latency metrics.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Sample rate of synthesized audio, used to estimate playback length.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Latency report sent after every turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnMetrics {
    pub turn_id: String,
    /// Time spent listening before the utterance was committed.
    pub listening_duration_ms: u64,
    pub thinking_ms: Option<u64>,
    pub speaking_ms: u64,
    /// Turn start to first spoken token.
    pub llm_first_token_ms: Option<u64>,
    /// First spoken token to first audio.
    pub tts_first_audio_ms: Option<u64>,
    /// Turn start to first audio.
    pub e2e_latency_ms: Option<u64>,
    pub llm_tokens: u64,
    pub llm_tok_per_sec: f64,
    pub tts_audio_chunks: u64,
    /// Playback length of the audio sent, from its byte count.
    pub tts_est_duration_ms: u64,
    pub turn_total_ms: u64,
    pub tool_calls: u32,
    pub interrupted: bool,
}

/// Timing marks collected while a turn runs.
#[derive(Debug, Clone)]
pub struct TurnClock {
    listening_started: Instant,
    turn_started: Instant,
    first_token: Option<Instant>,
    last_token: Option<Instant>,
    first_audio: Option<Instant>,
    tokens: u64,
    audio_chunks: u64,
    audio_bytes: u64,
    tool_calls: u32,
}

impl TurnClock {
    pub fn new(listening_started: Instant, turn_started: Instant) -> Self {
        Self {
            listening_started,
            turn_started,
            first_token: None,
            last_token: None,
            first_audio: None,
            tokens: 0,
            audio_chunks: 0,
            audio_bytes: 0,
            tool_calls: 0,
        }
    }

    /// Record a spoken token. Returns `(token_index, ms since first token)`.
    pub fn on_token(&mut self, now: Instant) -> (u64, u64) {
        self.tokens += 1;
        let first = *self.first_token.get_or_insert(now);
        self.last_token = Some(now);
        (self.tokens, millis(now.saturating_duration_since(first)))
    }

    /// Token count and first-to-last token span.
    pub fn token_span(&self) -> (u64, u64) {
        (self.tokens, self.llm_elapsed_ms())
    }

    pub fn on_audio(&mut self, bytes: usize, now: Instant) {
        self.audio_chunks += 1;
        self.audio_bytes += bytes as u64;
        self.first_audio.get_or_insert(now);
    }

    pub fn on_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    fn llm_elapsed_ms(&self) -> u64 {
        match (self.first_token, self.last_token) {
            (Some(first), Some(last)) => millis(last.saturating_duration_since(first)),
            _ => 0,
        }
    }

    /// Produce the report for a turn that ended at `finished`.
    pub fn finish(&self, turn_id: &str, finished: Instant, interrupted: bool) -> TurnMetrics {
        let since_start = |t: Instant| millis(t.saturating_duration_since(self.turn_started));
        let llm_elapsed_ms = self.llm_elapsed_ms();
        let llm_tok_per_sec = if llm_elapsed_ms > 0 {
            let secs = (llm_elapsed_ms as f64 / 1000.0).max(0.001);
            (self.tokens as f64 / secs * 100.0).round() / 100.0
        } else {
            0.0
        };

        TurnMetrics {
            turn_id: turn_id.to_string(),
            listening_duration_ms: millis(
                self.turn_started
                    .saturating_duration_since(self.listening_started),
            ),
            thinking_ms: self.first_token.map(since_start),
            speaking_ms: millis(
                finished.saturating_duration_since(self.first_token.unwrap_or(self.turn_started)),
            ),
            llm_first_token_ms: self.first_token.map(since_start),
            tts_first_audio_ms: match (self.first_audio, self.first_token) {
                (Some(audio), Some(token)) => Some(millis(audio.saturating_duration_since(token))),
                _ => None,
            },
            e2e_latency_ms: self.first_audio.map(since_start),
            llm_tokens: self.tokens,
            llm_tok_per_sec,
            tts_audio_chunks: self.audio_chunks,
            tts_est_duration_ms: self.audio_bytes * 1000 / 2 / u64::from(OUTPUT_SAMPLE_RATE),
            turn_total_ms: since_start(finished),
            tool_calls: self.tool_calls,
            interrupted,
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}
