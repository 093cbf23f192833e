//! Decoding of the agent's `text/event-stream` chat replies
//!
//! The server writes one event per line as `data: {"type": ..., ...}`. Lines
//! without the `data: ` prefix are noise, and a payload that fails to decode
//! is skipped so one bad line never costs the whole reply.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;

use crate::error::{DecodeError, TransportError};

const DATA_PREFIX: &str = "data: ";

/// Glyph appended to a reply while it is still streaming
pub const CURSOR: &str = "▌";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ThreadId { thread_id: String },
    Content { content: String },
    Done,
    Error {
        #[serde(default)]
        content: String,
    },
}

impl StreamEvent {
    /// `Done` and `Error` end the reply; nothing after them is read.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

/// Decode one line of the stream. `None` means the line carries no event.
pub fn decode_line(line: &str) -> Option<Result<StreamEvent, DecodeError>> {
    let line = line.trim_end_matches('\r');
    let payload = line.strip_prefix(DATA_PREFIX)?;
    Some(serde_json::from_str(payload).map_err(DecodeError::from))
}

/// Splits byte chunks into lines, holding back an unfinished line (and any
/// UTF-8 sequence cut in half) until the rest of it arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Whatever is left once the body ends without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Typed events read incrementally from a streaming chat response.
pub struct EventStream {
    body: ByteStream,
    lines: LineBuffer,
    ready: VecDeque<String>,
    body_done: bool,
    finished: bool,
}

impl EventStream {
    pub fn from_response(response: reqwest::Response) -> Self {
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from));
        Self::from_stream(body)
    }

    pub fn from_stream<S>(body: S) -> Self
    where
        S: Stream<Item = Result<Vec<u8>, TransportError>> + Send + 'static,
    {
        Self {
            body: Box::pin(body),
            lines: LineBuffer::new(),
            ready: VecDeque::new(),
            body_done: false,
            finished: false,
        }
    }

    /// Next event, or `None` once the reply is over. Read errors end the stream.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, TransportError>> {
        if self.finished {
            return None;
        }

        loop {
            while let Some(line) = self.ready.pop_front() {
                match decode_line(&line) {
                    Some(Ok(event)) => {
                        if event.is_terminal() {
                            self.finished = true;
                        }
                        return Some(Ok(event));
                    }
                    Some(Err(e)) => {
                        tracing::debug!(
                            error = %e,
                            line = %line,
                            "skipping undecodable stream line"
                        );
                    }
                    None => {}
                }
            }

            if self.body_done {
                self.finished = true;
                return None;
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.ready.extend(self.lines.push(&chunk)),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.body_done = true;
                    self.ready.extend(self.lines.finish());
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Accumulates one assistant reply from stream events.
#[derive(Debug, Default, Clone)]
pub struct ReplyBuffer {
    text: String,
    thread_id: Option<String>,
    error: Option<String>,
}

impl ReplyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: StreamEvent) -> Flow {
        match event {
            StreamEvent::ThreadId { thread_id } => {
                self.thread_id = Some(thread_id);
                Flow::Continue
            }
            StreamEvent::Content { content } => {
                self.text.push_str(&content);
                Flow::Continue
            }
            StreamEvent::Done => Flow::Stop,
            StreamEvent::Error { content } => {
                self.error = Some(content);
                Flow::Stop
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Latest thread id seen in this reply, if any.
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The in-progress rendering, with the cursor glyph.
    pub fn display(&self) -> String {
        format!("{}{}", self.text, CURSOR)
    }

    /// The final assistant message. A server-reported error is always part of it.
    pub fn finish(self) -> String {
        match self.error {
            None => self.text,
            Some(err) if self.text.is_empty() => format!("Error: {}", err),
            Some(err) => format!("{}\n\nError: {}", self.text, err),
        }
    }
}
