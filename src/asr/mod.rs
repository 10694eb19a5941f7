//! Streaming speech recognition.
//!
//! A [`SpeechChannel`] opens an [`AsrConnection`]: an audio sink the
//! session feeds raw PCM into, plus two receivers, one for display
//! transcripts and one for committed utterances. Two tasks run behind a
//! connection, one pumping audio out and one parsing responses; both stop
//! when the connection is closed. A task that stops because the upstream
//! failed records the error in the connection's [`FailureSlot`] before the
//! utterance channel closes.

pub mod soniox;
pub mod transcript;

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SpeechError};

pub use soniox::SonioxClient;
pub use transcript::{AsrToken, TokenBatch, TranscriptAssembler, TranscriptFragment};

/// Item on the outbound audio queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioFrame {
    /// Raw PCM s16le.
    Chunk(Bytes),
    /// No more audio; the upstream stream is closed after this.
    End,
}

/// Sending half of the outbound audio queue.
#[derive(Debug, Clone)]
pub struct AudioSink {
    tx: mpsc::UnboundedSender<AudioFrame>,
}

impl AudioSink {
    /// Create a sink and the receiver the audio pump drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AudioFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue one chunk. Returns `false` once the pump has stopped.
    pub fn send(&self, chunk: Bytes) -> bool {
        self.tx.send(AudioFrame::Chunk(chunk)).is_ok()
    }

    /// Queue the end-of-audio marker.
    pub fn end(&self) {
        let _ = self.tx.send(AudioFrame::End);
    }
}

/// The first error that ended a connection's background tasks.
#[derive(Debug, Clone, Default)]
pub struct FailureSlot(Arc<Mutex<Option<SpeechError>>>);

impl FailureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` unless one is already recorded.
    pub fn set(&self, error: SpeechError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    pub fn take(&self) -> Option<SpeechError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Owns the background tasks of one connection.
#[derive(Debug)]
pub struct AsrHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    failure: FailureSlot,
}

impl AsrHandle {
    pub fn new(cancel: CancellationToken, tasks: Vec<JoinHandle<()>>, failure: FailureSlot) -> Self {
        Self {
            cancel,
            tasks,
            failure,
        }
    }

    /// The upstream error that ended the stream, if any. Taken once.
    pub fn take_failure(&self) -> Option<SpeechError> {
        self.failure.take()
    }

    /// Whether every background task has exited.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }

    /// Stop the background tasks and wait for them.
    pub async fn close(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::error!(error = %e, "ASR task panicked");
            }
        }
    }
}

/// An open recognition stream.
#[derive(Debug)]
pub struct AsrConnection {
    /// Outbound PCM.
    pub audio: AudioSink,
    /// Display transcripts for the utterance in progress.
    pub transcripts: mpsc::UnboundedReceiver<TranscriptFragment>,
    /// Committed utterances, in order.
    pub utterances: mpsc::UnboundedReceiver<String>,
    /// Background task owner.
    pub handle: AsrHandle,
}

/// A streaming speech recognizer.
#[async_trait]
pub trait SpeechChannel: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Open a recognition stream.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Connection`](crate::error::SpeechError::Connection)
    /// when the upstream cannot be reached or rejects the session.
    async fn connect(&self) -> Result<AsrConnection>;
}
