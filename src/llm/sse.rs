//! `data:` framing for the chat completions event stream.
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"你"}}]}
//!
//! data: [DONE]
//! ```
//!
//! The body is buffered as bytes until a full line arrives, so CJK text split
//! across network reads decodes intact. Comments and non-`data` fields are
//! skipped.

/// One complete server event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A JSON chunk payload. Consecutive `data:` lines are joined with `\n`.
    Chunk(String),
    /// The `[DONE]` terminator.
    Done,
}

/// Incremental reader turning body bytes into [`Frame`]s.
#[derive(Debug, Default)]
pub struct ChunkReader {
    buf: Vec<u8>,
    data: Option<String>,
}

impl ChunkReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed body bytes; returns the frames they completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(end) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=end).collect();
            self.line(&line[..end], &mut frames);
        }
        frames
    }

    /// End of body: a trailing event without its blank line still counts.
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = std::mem::take(&mut self.buf);
        let mut frames = Vec::new();
        if !rest.is_empty() {
            self.line(&rest, &mut frames);
        }
        self.dispatch(&mut frames);
        frames.pop()
    }

    fn line(&mut self, raw: &[u8], frames: &mut Vec<Frame>) {
        let line = String::from_utf8_lossy(raw);
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if line.is_empty() {
            self.dispatch(frames);
            return;
        }
        let Some(value) = line.strip_prefix("data:") else {
            return;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match &mut self.data {
            Some(data) => {
                data.push('\n');
                data.push_str(value);
            }
            None => self.data = Some(value.to_string()),
        }
    }

    fn dispatch(&mut self, frames: &mut Vec<Frame>) {
        if let Some(data) = self.data.take() {
            frames.push(if data.trim() == "[DONE]" {
                Frame::Done
            } else {
                Frame::Chunk(data)
            });
        }
    }
}
