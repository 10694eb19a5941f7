//! Utterance admission: whitespace trimming and duplicate suppression.
//!
//! Endpoint detection occasionally fires twice for the same speech. An
//! utterance identical to the previously admitted one and arriving within
//! the window is dropped.

use std::time::{Duration, Instant};

/// Decides which committed utterances start a turn.
#[derive(Debug, Clone)]
pub struct UtteranceGate {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl UtteranceGate {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Trimmed text if the utterance should start a turn.
    pub fn admit(&mut self, utterance: &str, now: Instant) -> Option<String> {
        let text = utterance.trim();
        if text.is_empty() {
            return None;
        }
        if let Some((last_text, at)) = &self.last
            && last_text == text
            && now.saturating_duration_since(*at) < self.window
        {
            tracing::info!(text = %text, "ignoring duplicated utterance");
            return None;
        }
        self.last = Some((text.to_string(), now));
        Some(text.to_string())
    }
}
