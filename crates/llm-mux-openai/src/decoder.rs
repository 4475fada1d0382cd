//! Stream decoding for the OpenAI Chat Completions dialect.
//!
//! Events are JSON objects carrying `choices[0].delta.content`; the
//! literal `data: [DONE]` sentinel terminates the stream. The final
//! response is the first frame rewritten into the non-streaming shape:
//! `delta` removed, `message` filled with the accumulated text.

use llm_mux::error::{ErrorKind, LlmError};
use llm_mux::sse::SseEvent;
use llm_mux::stream_engine::{StreamDecoder, StreamStep};
use serde_json::{Value, json};

/// Decoder for OpenAI-compatible SSE streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiDecoder;

impl StreamDecoder for OpenAiDecoder {
    fn on_event(&self, ev: &SseEvent) -> StreamStep {
        if ev.data == "[DONE]" {
            return StreamStep::done();
        }
        match serde_json::from_str::<Value>(&ev.data) {
            Ok(frame) => match frame
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
            {
                Some(text) => StreamStep::chunk(text),
                None => StreamStep::skip(),
            },
            Err(_) => StreamStep::skip(),
        }
    }

    fn build_final(&self, first_frame: &[u8], accumulated: &str) -> Result<Value, LlmError> {
        let mut frame: Value = serde_json::from_slice(first_frame)?;

        let Some(choice) = frame
            .pointer_mut("/choices/0")
            .and_then(Value::as_object_mut)
        else {
            return Err(LlmError::new(
                ErrorKind::InvalidResponse,
                "stream frame carries no choices",
            ));
        };

        choice.remove("delta");
        choice.insert(
            "message".into(),
            json!({
                "content": accumulated,
                "role": "assistant",
                "finish_reason": "stop",
            }),
        );

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_owned(),
        }
    }

    #[test]
    fn test_done_sentinel_terminates() {
        let step = OpenAiDecoder.on_event(&event("[DONE]"));
        assert!(step.done);
    }

    #[test]
    fn test_delta_content_extracted() {
        let step = OpenAiDecoder.on_event(&event(
            r#"{"choices":[{"delta":{"content":"he"},"finish_reason":null}]}"#,
        ));
        assert_eq!(step.chunk.as_deref(), Some("he"));
        assert!(!step.done);
    }

    #[test]
    fn test_frames_without_content_skipped() {
        let step = OpenAiDecoder.on_event(&event(r#"{"choices":[{"delta":{}}]}"#));
        assert!(step.chunk.is_none());
        let step = OpenAiDecoder.on_event(&event("not json"));
        assert!(step.chunk.is_none());
    }

    #[test]
    fn test_build_final_rewrites_first_frame() {
        let first = br#"{"id":"cmpl-1","model":"gpt-4o","choices":[{"index":0,"delta":{"content":"he"}}]}"#;
        let final_json = OpenAiDecoder.build_final(first, "hello world").unwrap();

        // Original envelope survives.
        assert_eq!(final_json["id"], "cmpl-1");
        assert_eq!(final_json["model"], "gpt-4o");
        // The choice is rewritten into the non-streaming shape.
        let choice = &final_json["choices"][0];
        assert!(choice.get("delta").is_none());
        assert_eq!(choice["message"]["content"], "hello world");
        assert_eq!(choice["message"]["role"], "assistant");
        assert_eq!(choice["message"]["finish_reason"], "stop");
    }

    #[test]
    fn test_build_final_without_choices_errors() {
        let err = OpenAiDecoder.build_final(br#"{"x":1}"#, "text").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidResponse);
    }
}
