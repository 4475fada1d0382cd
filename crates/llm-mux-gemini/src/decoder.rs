//! Stream decoding for the Gemini `streamGenerateContent` dialect.
//!
//! Frames are JSON objects shaped like the non-streaming response,
//! carrying incremental text at `candidates[0].content.parts[0].text`.
//! A frame that reports `candidates[0].finishReason` without new text
//! terminates the stream. The final response is synthesized in the
//! normalized shape; usage metadata is zeroed rather than carried
//! through.

use llm_mux::error::LlmError;
use llm_mux::sse::SseEvent;
use llm_mux::stream_engine::{StreamDecoder, StreamStep};
use serde_json::{Value, json};

/// Decoder for Gemini SSE streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiDecoder;

impl StreamDecoder for GeminiDecoder {
    fn on_event(&self, ev: &SseEvent) -> StreamStep {
        if ev.data.is_empty() {
            return StreamStep::skip();
        }
        let Ok(frame) = serde_json::from_str::<Value>(&ev.data) else {
            return StreamStep::skip();
        };

        if let Some(text) = frame
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
        {
            if !text.is_empty() {
                return StreamStep::chunk(text);
            }
        }

        if frame.pointer("/candidates/0/finishReason").is_some() {
            return StreamStep::done();
        }

        StreamStep::skip()
    }

    fn build_final(&self, _first_frame: &[u8], accumulated: &str) -> Result<Value, LlmError> {
        Ok(json!({
            "candidates": [{
                "content": {
                    "parts": [{"text": accumulated}],
                    "role": "model",
                },
                "finishReason": "STOP",
                "index": 0,
            }],
            "usageMetadata": {
                "promptTokenCount": 0,
                "candidatesTokenCount": 0,
                "totalTokenCount": 0,
            },
        }))
    }
}
