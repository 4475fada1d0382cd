//! Stream decoding for the Anthropic Messages API.
//!
//! Anthropic frames are typed: `content_block_delta` carries text in
//! `delta.text`; `message_stop`, or a `message_delta` that reports a
//! `stop_reason`, terminates the stream. The final response is
//! synthesized in the normalized non-streaming shape rather than
//! rebuilt from the first frame.

use llm_mux::error::LlmError;
use llm_mux::sse::SseEvent;
use llm_mux::stream_engine::{StreamDecoder, StreamStep};
use serde_json::{Value, json};

/// Decoder for Anthropic SSE streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicDecoder;

impl StreamDecoder for AnthropicDecoder {
    fn on_event(&self, ev: &SseEvent) -> StreamStep {
        let Ok(frame) = serde_json::from_str::<Value>(&ev.data) else {
            return StreamStep::skip();
        };
        match frame.get("type").and_then(Value::as_str) {
            Some("content_block_delta") => {
                match frame.pointer("/delta/text").and_then(Value::as_str) {
                    Some(text) if !text.is_empty() => StreamStep::chunk(text),
                    _ => StreamStep::skip(),
                }
            }
            Some("message_delta") => {
                if frame.pointer("/delta/stop_reason").is_some() {
                    StreamStep::done()
                } else {
                    StreamStep::skip()
                }
            }
            Some("message_stop") => StreamStep::done(),
            _ => StreamStep::skip(),
        }
    }

    fn build_final(&self, _first_frame: &[u8], accumulated: &str) -> Result<Value, LlmError> {
        Ok(json!({
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": accumulated}],
        }))
    }
}
