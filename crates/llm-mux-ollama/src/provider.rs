//! Ollama `/api/chat` [`Llm`] implementation.

use http::StatusCode;
use llm_mux::context::CallContext;
use llm_mux::error::{ErrorKind, LlmError};
use llm_mux::message::Messages;
use llm_mux::provider::{
    ChunkHandler, FinalReceiver, Llm, ProviderResponse, RequestMutator, merge_chunk_handlers,
    normalize_body, reconcile_stream, set_stream_flag,
};
use llm_mux::selector::Selector;
use llm_mux::stream_engine::{self, StreamOptions};
use llm_mux::{redact, retry, transport};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::instrument;

use crate::config::OllamaConfig;
use crate::decoder::OllamaDecoder;

/// Path of the chat endpoint on every Ollama deployment.
const API_PATH: &str = "/api/chat";

/// Provider for a local (or proxied) Ollama server.
///
/// Ollama needs no API key; a configured one is sent as a bearer
/// token. Streaming uses newline-delimited JSON frames rather than
/// classic SSE, terminated by a `{"done":true}` frame.
#[derive(Debug)]
pub struct OllamaProvider {
    config: OllamaConfig,
    endpoints: Selector,
}

impl OllamaProvider {
    /// Creates a provider, clamping temperature into [0, 2].
    pub fn new(mut config: OllamaConfig) -> Self {
        if !(0.0..=2.0).contains(&config.temperature) {
            tracing::warn!(
                temperature = config.temperature,
                "temperature out of [0, 2], clamping"
            );
            config.temperature = config.temperature.clamp(0.0, 2.0);
        }
        let endpoints = Selector::parse(&config.base_url);
        Self { config, endpoints }
    }

    fn request_url(&self) -> String {
        let base = self.endpoints.next().trim_end_matches('/');
        format!("{base}{API_PATH}")
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        if !self.config.api_key.is_empty() {
            let auth = format!("Bearer {}", self.config.api_key);
            headers.insert(
                "authorization",
                HeaderValue::from_str(&auth).map_err(|_| {
                    LlmError::new(
                        ErrorKind::Unauthorized,
                        "API key contains invalid header characters",
                    )
                })?,
            );
        }
        Ok(headers)
    }
}

impl Llm for OllamaProvider {
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

    #[instrument(skip_all, fields(provider = "ollama", model = %self.config.model))]
    async fn generate(&self, cx: &CallContext, body: &[u8]) -> Result<Value, LlmError> {
        let body = normalize_body(self, body)?;
        let body = set_stream_flag(&body, false);
        redact::log_request_body(&body);

        let value = retry::run("ollama", self.config.max_retries, || async {
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

    #[instrument(skip_all, fields(provider = "ollama", model = %self.config.model))]
    async fn stream(
        &self,
        cx: &CallContext,
        body: &[u8],
        on_chunk: Option<ChunkHandler>,
    ) -> Result<FinalReceiver, LlmError> {
        let body = normalize_body(self, body)?;
        let (body, streaming) = reconcile_stream(&body, on_chunk.is_some());
        redact::log_request_body(&body);

        if !streaming {
            let value = self.generate(cx, &body).await?;
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let _ = tx.try_send(value);
            return Ok(rx);
        }

        let response = retry::run("ollama", self.config.max_retries, || async {
            let url = self.request_url();
            let headers = self.headers()?;
            transport::open_stream(cx, &url, headers, &body).await
        })
        .await?;

        Ok(stream_engine::drive(
            transport::byte_stream(response),
            OllamaDecoder,
            StreamOptions {
                timeout: self.config.stream_timeout,
                on_chunk: merge_chunk_handlers(self.config.on_message.clone(), on_chunk),
                cancel: cx.cancel_token().clone(),
            },
        ))
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, LlmError> {
        let Some(content) = body.pointer("/message/content") else {
            return Err(LlmError::new(
                ErrorKind::InvalidResponse,
                format!("error parsing response: {body}"),
            ));
        };
        let text = content.as_str().unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::new(
                ErrorKind::InvalidResponse,
                "empty response from API",
            ));
        }
        Ok(ProviderResponse::from_content(text.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(config: OllamaConfig) -> OllamaProvider {
        OllamaProvider::new(config)
    }

    #[test]
    fn test_request_url_targets_api_chat() {
        let p = provider(OllamaConfig {
            base_url: "http://localhost:11434".into(),
            ..Default::default()
        });
        assert_eq!(p.request_url(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_prepare_request_shape() {
        let p = provider(OllamaConfig {
            model: "qwen2.5:3b".into(),
            ..Default::default()
        });
        let messages = Messages::from_prompt("hi");
        let body = p.prepare_request(&messages, &[]).unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(v["model"], "qwen2.5:3b");
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_headers_empty_without_key() {
        let p = provider(OllamaConfig {
            api_key: String::new(),
            ..Default::default()
        });
        assert!(p.headers().unwrap().is_empty());
    }

    #[test]
    fn test_headers_bearer_when_key_set() {
        let p = provider(OllamaConfig {
            api_key: "proxy-token".into(),
            ..Default::default()
        });
        let headers = p.headers().unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer proxy-token");
    }

    #[test]
    fn test_parse_response_content() {
        let p = provider(OllamaConfig::default());
        let body = json!({"model": "qwen2.5:3b", "message": {"role": "assistant", "content": "hello"}, "done": true});
        let resp = p.parse_response(&body).unwrap();
        assert_eq!(resp.content, b"hello");
    }

    #[test]
    fn test_parse_response_missing_message() {
        let p = provider(OllamaConfig::default());
        let err = p.parse_response(&json!({"done": true})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidResponse);
    }

    #[test]
    fn test_parse_response_empty_content() {
        let p = provider(OllamaConfig::default());
        let body = json!({"message": {"content": ""}});
        let err = p.parse_response(&body).unwrap_err();
        assert!(err.message.contains("empty response"));
    }

    #[test]
    fn test_temperature_clamped() {
        let p = provider(OllamaConfig {
            temperature: 2.7,
            ..Default::default()
        });
        assert_eq!(p.config.temperature, 2.0);

        let p = provider(OllamaConfig {
            temperature: -0.5,
            ..Default::default()
        });
        assert_eq!(p.config.temperature, 0.0);
    }
}
