//! Mock provider for tests.
//!
//! [`MockLlm`] is a queue-based fake: tests enqueue raw provider
//! responses (or errors) and each `generate` pops the front. It speaks
//! the OpenAI response dialect for parsing, which keeps fixtures
//! readable. Every dispatched body is recorded for later assertions.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::{Value, json};

use crate::context::CallContext;
use crate::error::{ErrorKind, LlmError};
use crate::message::Messages;
use crate::provider::{
    ChunkHandler, FinalReceiver, Llm, ProviderResponse, RequestMutator, ToolCall,
};

/// A queue-based fake provider.
///
/// # Panics
///
/// `generate` (and therefore `stream`) panics when the queue is empty —
/// a test bug, not a runtime condition.
#[derive(Default)]
pub struct MockLlm {
    responses: Mutex<VecDeque<Result<Value, LlmError>>>,
    bodies: Mutex<Vec<Vec<u8>>>,
}

impl MockLlm {
    /// A mock with empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a raw provider response.
    pub fn queue_response(&self, response: Value) {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .push_back(Ok(response));
    }

    /// Enqueues a plain text answer in the OpenAI response shape.
    pub fn queue_content(&self, text: &str) {
        self.queue_response(json!({
            "choices": [{"message": {"content": text}}]
        }));
    }

    /// Enqueues a single tool-call response.
    pub fn queue_tool_call(&self, name: &str, args: &str) {
        self.queue_response(json!({
            "choices": [{"message": {
                "content": "",
                "tool_calls": [{"function": {"name": name, "arguments": args}}]
            }}]
        }));
    }

    /// Enqueues an error for the next `generate`.
    pub fn queue_error(&self, error: LlmError) {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .push_back(Err(error));
    }

    /// Bodies dispatched so far, in order.
    pub fn recorded_bodies(&self) -> Vec<Vec<u8>> {
        self.bodies.lock().expect("mock lock poisoned").clone()
    }

    /// Number of `generate` dispatches so far.
    pub fn generate_calls(&self) -> usize {
        self.bodies.lock().expect("mock lock poisoned").len()
    }
}

impl Llm for MockLlm {
    fn prepare_request(
        &self,
        messages: &Messages,
        mutators: &[RequestMutator],
    ) -> Result<Vec<u8>, LlmError> {
        if messages.is_empty() {
            return Err(LlmError::new(
                ErrorKind::InvalidRequest,
                "messages cannot be empty",
            ));
        }
        let mut request = serde_json::Map::new();
        request.insert("model".into(), Value::String("mock".into()));
        request.insert("stream".into(), Value::Bool(false));
        request.insert(
            "messages".into(),
            Value::Array(
                messages
                    .history()
                    .iter()
                    .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
                    .collect(),
            ),
        );
        for mutator in mutators {
            mutator(&mut request);
        }
        serde_json::to_vec(&Value::Object(request)).map_err(Into::into)
    }

    async fn generate(&self, _cx: &CallContext, body: &[u8]) -> Result<Value, LlmError> {
        self.bodies
            .lock()
            .expect("mock lock poisoned")
            .push(body.to_vec());
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .expect("MockLlm response queue is empty")
    }

    async fn stream(
        &self,
        cx: &CallContext,
        body: &[u8],
        on_chunk: Option<ChunkHandler>,
    ) -> Result<FinalReceiver, LlmError> {
        let value = self.generate(cx, body).await?;
        if let Some(cb) = on_chunk {
            if let Some(text) = value
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
            {
                if !text.is_empty() {
                    cb(text, value.to_string().as_bytes());
                }
            }
        }
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx.try_send(value);
        Ok(rx)
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, LlmError> {
        if let Some(calls) = body
            .pointer("/choices/0/message/tool_calls")
            .and_then(Value::as_array)
        {
            if !calls.is_empty() {
                let tools = calls
                    .iter()
                    .map(|c| ToolCall {
                        name: c
                            .pointer("/function/name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                        args: c
                            .pointer("/function/arguments")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                    })
                    .collect();
                return Ok(ProviderResponse::from_tools(tools));
            }
        }

        let Some(content) = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
        else {
            return Err(LlmError::new(
                ErrorKind::InvalidResponse,
                format!("error parsing response: {body}"),
            ));
        };
        if content.trim().is_empty() {
            return Err(LlmError::new(
                ErrorKind::InvalidResponse,
                "empty response from API",
            ));
        }
        Ok(ProviderResponse::from_content(content.as_bytes().to_vec()))
    }
}

impl std::fmt::Debug for MockLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLlm")
            .field(
                "queued",
                &self.responses.lock().expect("mock lock poisoned").len(),
            )
            .field("calls", &self.generate_calls())
            .finish()
    }
}
