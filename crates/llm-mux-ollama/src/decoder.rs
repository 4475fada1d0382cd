//! Stream decoding for Ollama's newline-delimited JSON protocol.
//!
//! Ollama does not speak classic SSE: each line of the response body is
//! a complete JSON object with the incremental text at
//! `message.content`, and a final `{"done":true}` frame terminates the
//! stream. The final response is the first frame rewritten into the
//! completed non-streaming shape.

use llm_mux::error::LlmError;
use llm_mux::sse::{Framing, SseEvent};
use llm_mux::stream_engine::{StreamDecoder, StreamStep};
use serde_json::{Value, json};

/// Decoder for Ollama NDJSON streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaDecoder;

impl StreamDecoder for OllamaDecoder {
    fn framing(&self) -> Framing {
        Framing::JsonLines
    }

    fn on_event(&self, ev: &SseEvent) -> StreamStep {
        let Ok(frame) = serde_json::from_str::<Value>(&ev.data) else {
            return StreamStep::skip();
        };
        if frame.get("done").and_then(Value::as_bool) == Some(true) {
            return StreamStep::done();
        }
        match frame.pointer("/message/content").and_then(Value::as_str) {
            Some(text) if !text.is_empty() => StreamStep::chunk(text),
            _ => StreamStep::skip(),
        }
    }

    fn build_final(&self, first_frame: &[u8], accumulated: &str) -> Result<Value, LlmError> {
        let mut frame: Value = serde_json::from_slice(first_frame)?;
        if let Some(obj) = frame.as_object_mut() {
            obj.insert("done".into(), Value::Bool(true));
            obj.insert("done_reason".into(), Value::String("stop".into()));
            obj.insert(
                "message".into(),
                json!({"role": "assistant", "content": accumulated}),
            );
        }
        Ok(frame)
    }
}
