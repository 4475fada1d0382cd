//! Anthropic Messages [`Llm`] implementation.

use http::StatusCode;
use llm_mux::context::CallContext;
use llm_mux::error::{ErrorKind, LlmError};
use llm_mux::message::{Messages, Role};
use llm_mux::provider::{
    ChunkHandler, FinalReceiver, Llm, ProviderResponse, RequestMutator, merge_chunk_handlers,
    normalize_body, reconcile_stream, require_api_key, set_stream_flag,
};
use llm_mux::selector::Selector;
use llm_mux::stream_engine::{self, StreamOptions};
use llm_mux::{redact, retry, transport};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::instrument;

use crate::config::AnthropicConfig;
use crate::decoder::AnthropicDecoder;

/// Provider for the Anthropic Messages API.
///
/// Dialect notes: system turns are concatenated into the top-level
/// `system` field, every message's content becomes a text block array,
/// `max_tokens` is mandatory, and auth rides in `x-api-key` plus the
/// `anthropic-version` header.
#[derive(Debug)]
pub struct AnthropicProvider {
    config: AnthropicConfig,
    endpoints: Selector,
    keys: Selector,
}

impl AnthropicProvider {
    /// Creates a provider, clamping temperature into [0, 2].
    pub fn new(mut config: AnthropicConfig) -> Self {
        if !(0.0..=2.0).contains(&config.temperature) {
            tracing::warn!(
                temperature = config.temperature,
                "temperature out of [0, 2], clamping"
            );
            config.temperature = config.temperature.clamp(0.0, 2.0);
        }
        let endpoints = Selector::parse(&config.base_url);
        let keys = Selector::parse(&config.api_key);
        Self {
            config,
            endpoints,
            keys,
        }
    }

    fn request_url(&self) -> String {
        let base = self.endpoints.next().trim_end_matches('/');
        format!("{base}{}", self.config.api_path)
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.keys.next()).map_err(|_| {
                LlmError::new(
                    ErrorKind::Unauthorized,
                    "API key contains invalid header characters",
                )
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(&self.config.version).map_err(|_| {
                LlmError::new(
                    ErrorKind::InvalidRequest,
                    "anthropic-version contains invalid header characters",
                )
            })?,
        );
        Ok(headers)
    }
}

impl Llm for AnthropicProvider {
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
        request.insert("model".into(), Value::String(self.config.model.clone()));
        request.insert("stream".into(), Value::Bool(self.config.stream));
        request.insert("temperature".into(), json!(self.config.temperature));

        // System turns collapse into the top-level `system` field; the
        // Messages API accepts only user/assistant roles in `messages`.
        let mut system: Vec<&str> = Vec::new();
        let mut turns: Vec<Value> = Vec::new();
        for message in messages.history() {
            match message.role {
                Role::System => system.push(&message.content),
                role => {
                    let role = match role {
                        Role::Assistant => "assistant",
                        _ => "user",
                    };
                    turns.push(json!({
                        "role": role,
                        "content": [{"type": "text", "text": message.content}],
                    }));
                }
            }
        }
        if !system.is_empty() {
            request.insert("system".into(), Value::String(system.join("\n\n")));
        }
        request.insert("messages".into(), Value::Array(turns));
        request.insert("max_tokens".into(), json!(self.config.max_tokens.max(1)));

        for mutator in mutators {
            mutator(&mut request);
        }

        // Mandatory whatever the mutators did.
        request
            .entry("max_tokens".to_owned())
            .or_insert_with(|| json!(1024));

        serde_json::to_vec(&Value::Object(request)).map_err(Into::into)
    }

    #[instrument(skip_all, fields(provider = "anthropic", model = %self.config.model))]
    async fn generate(&self, cx: &CallContext, body: &[u8]) -> Result<Value, LlmError> {
        require_api_key(&self.keys, "anthropic")?;

        let body = normalize_body(self, body)?;
        let body = set_stream_flag(&body, false);
        redact::log_request_body(&body);

        let value = retry::run("anthropic", self.config.max_retries, || async {
            let url = self.request_url();
            let headers = self.headers()?;
            let resp =
                transport::post_json(cx, &url, headers, &body, self.config.request_timeout).await?;
            if resp.status != StatusCode::OK {
                return Err(LlmError::from_status(resp.status, &resp.body));
            }
            resp.json()
        })
        .await?;

        if llm_mux::is_debug() {
            tracing::debug!(response = %value, "provider response");
        }
        Ok(value)
    }

    #[instrument(skip_all, fields(provider = "anthropic", model = %self.config.model))]
    async fn stream(
        &self,
        cx: &CallContext,
        body: &[u8],
        on_chunk: Option<ChunkHandler>,
    ) -> Result<FinalReceiver, LlmError> {
        require_api_key(&self.keys, "anthropic")?;

        let body = normalize_body(self, body)?;
        let (body, streaming) = reconcile_stream(&body, on_chunk.is_some());
        redact::log_request_body(&body);

        if !streaming {
            let value = self.generate(cx, &body).await?;
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let _ = tx.try_send(value);
            return Ok(rx);
        }

        let response = retry::run("anthropic", self.config.max_retries, || async {
            let url = self.request_url();
            let headers = self.headers()?;
            transport::open_stream(cx, &url, headers, &body).await
        })
        .await?;

        Ok(stream_engine::drive(
            transport::byte_stream(response),
            AnthropicDecoder,
            StreamOptions {
                timeout: self.config.stream_timeout,
                on_chunk: merge_chunk_handlers(self.config.on_message.clone(), on_chunk),
                cancel: cx.cancel_token().clone(),
            },
        ))
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, LlmError> {
        let text = body
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if text.is_empty() {
            if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
                return Err(LlmError::new(ErrorKind::Unknown, message.to_owned()));
            }
            return Ok(ProviderResponse::from_content(Vec::new()));
        }
        Ok(ProviderResponse::from_content(text.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(config: AnthropicConfig) -> AnthropicProvider {
        AnthropicProvider::new(config)
    }

    #[test]
    fn test_prepare_request_collects_system_turns() {
        let p = provider(AnthropicConfig::default());
        let mut messages = Messages::new();
        messages.append_system("first rule");
        messages.append_user("hi");
        messages.append_system("second rule");
        messages.append_assistant("hello");

        let body = p.prepare_request(&messages, &[]).unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(v["system"], "first rule\n\nsecond rule");
        let turns = v["messages"].as_array().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["role"], "user");
        assert_eq!(turns[0]["content"][0]["type"], "text");
        assert_eq!(turns[0]["content"][0]["text"], "hi");
        assert_eq!(turns[1]["role"], "assistant");
    }

    #[test]
    fn test_prepare_request_max_tokens_mandatory() {
        let p = provider(AnthropicConfig {
            max_tokens: 4096,
            ..Default::default()
        });
        let messages = Messages::from_prompt("hi");
        let body = p.prepare_request(&messages, &[]).unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["max_tokens"], 4096);
    }

    #[test]
    fn test_prepare_request_max_tokens_survives_mutator_removal() {
        use std::sync::Arc;
        let p = provider(AnthropicConfig::default());
        let messages = Messages::from_prompt("hi");
        let strip: RequestMutator = Arc::new(|req| {
            req.remove("max_tokens");
        });
        let body = p.prepare_request(&messages, &[strip]).unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["max_tokens"], 1024);
    }

    #[test]
    fn test_prepare_request_rejects_empty_conversation() {
        let p = provider(AnthropicConfig::default());
        let err = p.prepare_request(&Messages::new(), &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_headers_carry_key_and_version() {
        let p = provider(AnthropicConfig {
            api_key: "sk-ant-123".into(),
            ..Default::default()
        });
        let headers = p.headers().unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant-123");
        assert_eq!(headers.get("anthropic-version").unwrap(), "2023-06-01");
    }

    #[test]
    fn test_parse_response_text() {
        let p = provider(AnthropicConfig::default());
        let body = json!({"type": "message", "content": [{"type": "text", "text": "hello"}]});
        let resp = p.parse_response(&body).unwrap();
        assert_eq!(resp.content, b"hello");
    }

    #[test]
    fn test_parse_response_error_field() {
        let p = provider(AnthropicConfig::default());
        let body = json!({"error": {"type": "overloaded_error", "message": "overloaded"}});
        let err = p.parse_response(&body).unwrap_err();
        assert_eq!(err.message, "overloaded");
    }

    #[test]
    fn test_parse_response_empty_content_tolerated() {
        let p = provider(AnthropicConfig::default());
        let resp = p.parse_response(&json!({"content": []})).unwrap();
        assert!(resp.content.is_empty());
        assert!(!resp.has_tools());
    }

    #[tokio::test]
    async fn test_generate_without_key_is_unauthorized() {
        let p = provider(AnthropicConfig {
            api_key: String::new(),
            ..Default::default()
        });
        let err = p.generate(&CallContext::new(), b"{}").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert!(err.message.contains("anthropic api key is required"));
    }

    #[test]
    fn test_temperature_clamped() {
        let p = provider(AnthropicConfig {
            temperature: 9.0,
            ..Default::default()
        });
        assert_eq!(p.config.temperature, 2.0);
    }
}
