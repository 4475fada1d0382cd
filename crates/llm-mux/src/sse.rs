//! Wire framing for streaming responses.
//!
//! Two framings exist in the wild: classic server-sent events
//! (`event:`/`data:` lines, events separated by a blank line) and
//! newline-delimited JSON (one object per line, used by Ollama).
//! [`FrameBuffer`] turns an arbitrary byte-chunk sequence into complete
//! [`SseEvent`]s, handling UTF-8 sequences and frames split across
//! network reads.

use crate::error::{ErrorKind, LlmError};

/// Upper bound on buffered, not-yet-framed data. A stream that exceeds
/// this is malformed and aborted.
const MAX_BUF: usize = 16 * 1024 * 1024; // 16 MiB

/// How a provider frames its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `data:` lines, events separated by a blank line.
    Sse,
    /// One JSON object per line.
    JsonLines,
}

/// One complete frame extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, when the framing carries one.
    pub event: Option<String>,
    /// The payload (the `data:` line, or the whole line for NDJSON).
    pub data: String,
}

impl SseEvent {
    /// The payload as bytes.
    pub fn raw(&self) -> &[u8] {
        self.data.as_bytes()
    }
}

/// Incremental frame splitter.
///
/// Feed network chunks with [`push`](Self::push); each call returns the
/// frames completed by that chunk. Bytes that form an incomplete UTF-8
/// sequence or an unterminated frame are carried over to the next call.
#[derive(Debug)]
pub struct FrameBuffer {
    framing: Framing,
    text: String,
    utf8: Vec<u8>,
}

impl FrameBuffer {
    /// Creates a buffer for the given framing.
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            text: String::new(),
            utf8: Vec::new(),
        }
    }

    /// Consumes a network chunk, returning the frames it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, LlmError> {
        self.utf8.extend_from_slice(chunk);

        if self.utf8.len() > MAX_BUF || self.text.len() > MAX_BUF {
            self.utf8.clear();
            self.text.clear();
            return Err(LlmError::new(
                ErrorKind::InvalidResponse,
                "stream buffer exceeded 16 MiB",
            ));
        }

        match std::str::from_utf8(&self.utf8) {
            Ok(valid) => {
                self.text.push_str(valid);
                self.utf8.clear();
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if valid_up_to > 0 {
                    // SAFETY: `from_utf8` validated bytes up to this
                    // index as well-formed UTF-8.
                    let valid =
                        unsafe { std::str::from_utf8_unchecked(&self.utf8[..valid_up_to]) };
                    self.text.push_str(valid);
                }
                match e.error_len() {
                    // Permanently invalid bytes are skipped.
                    Some(bad) => {
                        self.utf8.drain(..valid_up_to + bad);
                    }
                    // Incomplete sequence: keep the tail for the next chunk.
                    None => {
                        self.utf8.drain(..valid_up_to);
                    }
                }
            }
        }

        Ok(self.drain_frames())
    }

    fn drain_frames(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        match self.framing {
            Framing::Sse => loop {
                // Events end at a blank line; accept LF and CRLF framing.
                let lf = self.text.find("\n\n");
                let crlf = self.text.find("\r\n\r\n");
                let (pos, delim) = match (lf, crlf) {
                    (Some(a), Some(b)) if b < a => (b, 4),
                    (Some(a), _) => (a, 2),
                    (None, Some(b)) => (b, 4),
                    (None, None) => break,
                };
                let frame: String = self.text.drain(..pos + delim).collect();
                if let Some(ev) = parse_sse_frame(&frame) {
                    events.push(ev);
                }
            },
            Framing::JsonLines => {
                while let Some(pos) = self.text.find('\n') {
                    let line: String = self.text.drain(..=pos).collect();
                    let line = line.trim();
                    if !line.is_empty() {
                        events.push(SseEvent {
                            event: None,
                            data: line.to_owned(),
                        });
                    }
                }
            }
        }
        events
    }
}

/// Extracts `event:` and `data:` fields from one SSE frame.
///
/// Frames without a `data:` line (comments, pings) yield `None`.
fn parse_sse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data = None;
    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim_start().to_owned());
        } else if let Some(value) = line.strip_prefix("data:") {
            data = Some(value.strip_prefix(' ').unwrap_or(value).to_owned());
        }
    }
    data.map(|data| SseEvent { event, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sse_event() {
        let mut buf = FrameBuffer::new(Framing::Sse);
        let events = buf.push(b"data: {\"x\":1}\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"x\":1}");
        assert!(events[0].event.is_none());
    }

    #[test]
    fn test_event_field_captured() {
        let mut buf = FrameBuffer::new(Framing::Sse);
        let events = buf
            .push(b"event: content_block_delta\ndata: {\"t\":1}\n\n")
            .unwrap();
        assert_eq!(events[0].event.as_deref(), Some("content_block_delta"));
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut buf = FrameBuffer::new(Framing::Sse);
        assert!(buf.push(b"data: {\"he").unwrap().is_empty());
        assert!(buf.push(b"llo\":true}").unwrap().is_empty());
        let events = buf.push(b"\n\n").unwrap();
        assert_eq!(events[0].data, "{\"hello\":true}");
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut buf = FrameBuffer::new(Framing::Sse);
        let events = buf.push(b"data: a\n\ndata: b\n\ndata: [DONE]\n\n").unwrap();
        let payloads: Vec<&str> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(payloads, ["a", "b", "[DONE]"]);
    }

    #[test]
    fn test_crlf_frames() {
        let mut buf = FrameBuffer::new(Framing::Sse);
        let events = buf.push(b"data: x\r\n\r\ndata: y\r\n\r\n").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "x");
        assert_eq!(events[1].data, "y");
    }

    #[test]
    fn test_comment_only_frame_skipped() {
        let mut buf = FrameBuffer::new(Framing::Sse);
        let events = buf.push(b": ping\n\ndata: real\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "real");
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let mut buf = FrameBuffer::new(Framing::Sse);
        let text = "data: héllo\n\n".as_bytes();
        // Split in the middle of the two-byte é sequence.
        let split = text.iter().position(|&b| b == 0xc3).unwrap() + 1;
        assert!(buf.push(&text[..split]).unwrap().is_empty());
        let events = buf.push(&text[split..]).unwrap();
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn test_json_lines_framing() {
        let mut buf = FrameBuffer::new(Framing::JsonLines);
        let events = buf
            .push(b"{\"done\":false}\n{\"done\":true}\n")
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, "{\"done\":true}");
    }

    #[test]
    fn test_json_lines_partial_line_held_back() {
        let mut buf = FrameBuffer::new(Framing::JsonLines);
        assert!(buf.push(b"{\"a\":").unwrap().is_empty());
        let events = buf.push(b"1}\n").unwrap();
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn test_buffer_overflow_errors() {
        let mut buf = FrameBuffer::new(Framing::Sse);
        let chunk = vec![b'a'; MAX_BUF + 1];
        let err = buf.push(&chunk).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidResponse);
    }
}
