//! Streaming speech synthesis.
//!
//! A [`SpeechSynthesizer`] turns a stream of text chunks into a stream of
//! PCM audio. The audio side is a queue of [`AudioItem`]s ending in an
//! [`AudioItem::End`] or [`AudioItem::Failed`] sentinel; whoever ends a
//! stream (normal finish, upstream failure, or cancellation) pushes one,
//! and the consumer stops at the first.

pub mod qwen;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SpeechError;

pub use qwen::QwenSynthesizer;

/// Item on an audio queue.
#[derive(Debug)]
pub enum AudioItem {
    /// PCM s16le.
    Chunk(Bytes),
    /// Synthesis finished or was cancelled.
    End,
    /// The upstream failed; no more audio will arrive.
    Failed(SpeechError),
}

/// Producer side of an audio queue.
pub type AudioSender = mpsc::UnboundedSender<AudioItem>;

type Cleanup = Box<dyn FnOnce() + Send>;

/// Consumer side of one synthesis call.
///
/// Dropping the stream runs its cleanup, which releases the per-stream
/// state held by the synthesizer.
pub struct SpeechStream {
    audio: mpsc::UnboundedReceiver<AudioItem>,
    cleanup: Option<Cleanup>,
    done: bool,
    failure: Option<SpeechError>,
}

impl std::fmt::Debug for SpeechStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechStream")
            .field("done", &self.done)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl SpeechStream {
    /// Create an audio queue and the stream that drains it.
    pub fn channel() -> (AudioSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                audio: rx,
                cleanup: None,
                done: false,
                failure: None,
            },
        )
    }

    /// Run `cleanup` when the stream is dropped.
    pub fn with_cleanup(mut self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Next audio chunk, or `None` once the stream has ended.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.done {
            return None;
        }
        match self.audio.recv().await {
            Some(AudioItem::Chunk(chunk)) => Some(chunk),
            Some(AudioItem::Failed(e)) => {
                self.done = true;
                self.failure = Some(e);
                None
            }
            Some(AudioItem::End) | None => {
                self.done = true;
                None
            }
        }
    }

    /// The error that ended the stream, if it failed. Taken once.
    pub fn take_failure(&mut self) -> Option<SpeechError> {
        self.failure.take()
    }
}

impl Drop for SpeechStream {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// A streaming text-to-speech backend.
pub trait SpeechSynthesizer: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Start synthesizing the chunks received on `text`.
    ///
    /// Synthesis finishes once `text` is closed and the backend has
    /// flushed its audio. Must be called from within a Tokio runtime.
    fn stream_speech(&self, text: mpsc::UnboundedReceiver<String>) -> SpeechStream;

    /// Stop the active stream, if any. The consumer sees end-of-stream
    /// promptly even if the backend is slow to shut down.
    fn cancel(&self);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn sentinel_ends_stream() {
        let (tx, mut stream) = SpeechStream::channel();
        let _ = tx.send(AudioItem::Chunk(Bytes::from_static(b"ab")));
        let _ = tx.send(AudioItem::End);
        let _ = tx.send(AudioItem::Chunk(Bytes::from_static(b"late")));
        assert_eq!(stream.next_chunk().await, Some(Bytes::from_static(b"ab")));
        assert_eq!(stream.next_chunk().await, None);
        assert_eq!(stream.next_chunk().await, None);
        assert!(stream.take_failure().is_none());
    }

    #[tokio::test]
    async fn failure_ends_stream_and_is_kept() {
        let (tx, mut stream) = SpeechStream::channel();
        let _ = tx.send(AudioItem::Chunk(Bytes::from_static(b"ab")));
        let _ = tx.send(AudioItem::Failed(SpeechError::Tts("quota".into())));
        let _ = tx.send(AudioItem::End);
        assert_eq!(stream.next_chunk().await, Some(Bytes::from_static(b"ab")));
        assert_eq!(stream.next_chunk().await, None);
        assert!(matches!(stream.take_failure(), Some(SpeechError::Tts(m)) if m == "quota"));
        assert!(stream.take_failure().is_none());
    }

    #[tokio::test]
    async fn end_before_failure_hides_it() {
        let (tx, mut stream) = SpeechStream::channel();
        let _ = tx.send(AudioItem::End);
        let _ = tx.send(AudioItem::Failed(SpeechError::Tts("closed".into())));
        assert_eq!(stream.next_chunk().await, None);
        assert!(stream.take_failure().is_none());
    }

    #[tokio::test]
    async fn dropped_sender_ends_stream() {
        let (tx, mut stream) = SpeechStream::channel();
        drop(tx);
        assert_eq!(stream.next_chunk().await, None);
    }

    #[test]
    fn cleanup_runs_on_drop() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = cleaned.clone();
        let (_tx, stream) = SpeechStream::channel();
        let stream = stream.with_cleanup(move || flag.store(true, Ordering::SeqCst));
        assert!(!cleaned.load(Ordering::SeqCst));
        drop(stream);
        assert!(cleaned.load(Ordering::SeqCst));
    }
}
