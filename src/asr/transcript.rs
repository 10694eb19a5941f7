//! Transcript assembly from streamed recognition tokens.
//!
//! Recognition responses carry three kinds of token: finalized text,
//! provisional text that may still change, and an endpoint marker that
//! closes the current utterance. Finalized text accumulates for the
//! current utterance only; the endpoint marker commits it and starts over.

use serde::Deserialize;

/// Token text marking the end of an utterance.
pub const ENDPOINT_MARKER: &str = "<end>";

/// One recognized token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AsrToken {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

impl AsrToken {
    pub fn new(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
        }
    }
}

/// Display text for the utterance in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    /// Finalized text so far followed by the provisional tail.
    pub text: String,
    /// No provisional tokens were present.
    pub is_final: bool,
}

/// What one batch of tokens produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenBatch {
    /// Updated display text, if the batch carried any text.
    pub fragment: Option<TranscriptFragment>,
    /// A committed utterance, if the batch carried an endpoint marker.
    pub utterance: Option<String>,
}

/// Accumulates finalized tokens for the current utterance.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    finals: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finalized text of the current utterance.
    pub fn pending(&self) -> &str {
        &self.finals
    }

    /// Feed one response's tokens.
    ///
    /// The display fragment is built before the endpoint is handled, so a
    /// batch ending in `<end>` shows its text and commits it.
    pub fn push(&mut self, tokens: &[AsrToken]) -> TokenBatch {
        let mut provisional = String::new();
        let mut endpoint = false;

        for token in tokens {
            if token.text.is_empty() {
                continue;
            }
            if token.text == ENDPOINT_MARKER {
                endpoint = true;
            } else if token.is_final {
                self.finals.push_str(&token.text);
            } else {
                provisional.push_str(&token.text);
            }
        }

        let mut batch = TokenBatch::default();
        let display = format!("{}{provisional}", self.finals);
        if !display.is_empty() {
            batch.fragment = Some(TranscriptFragment {
                text: display,
                is_final: provisional.is_empty(),
            });
        }
        if endpoint {
            batch.utterance = self.flush();
        }
        batch
    }

    /// Commit whatever finalized text is pending and reset.
    ///
    /// Returns `None` when the trimmed text is empty.
    pub fn flush(&mut self) -> Option<String> {
        let utterance = self.finals.trim().to_string();
        self.finals.clear();
        (!utterance.is_empty()).then_some(utterance)
    }
}
