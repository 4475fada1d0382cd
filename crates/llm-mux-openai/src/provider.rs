//! OpenAI-compatible [`Llm`] implementation.

use http::StatusCode;
use llm_mux::context::CallContext;
use llm_mux::error::{ErrorKind, LlmError};
use llm_mux::message::Messages;
use llm_mux::provider::{
    ChunkHandler, FinalReceiver, Llm, ProviderResponse, RequestMutator, ToolCall,
    merge_chunk_handlers, normalize_body, reconcile_stream, require_api_key, set_stream_flag,
};
use llm_mux::selector::Selector;
use llm_mux::stream_engine::{self, StreamOptions};
use llm_mux::{redact, retry, transport};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::instrument;

use crate::config::OpenAiConfig;
use crate::decoder::OpenAiDecoder;

/// Provider for the OpenAI Chat Completions dialect.
///
/// Also serves Deepseek and any other OpenAI-compatible endpoint via
/// [`deepseek`](Self::deepseek) or a custom
/// [`base_url`](OpenAiConfig::base_url).
///
/// ```rust,no_run
/// use llm_mux::{CallContext, complete_prompt};
/// use llm_mux_openai::{OpenAiConfig, OpenAiProvider};
///
/// # async fn example() -> Result<(), llm_mux::LlmError> {
/// let provider = OpenAiProvider::new(OpenAiConfig {
///     api_key: std::env::var("OPENAI_API_KEY").unwrap(),
///     ..Default::default()
/// });
/// let answer = complete_prompt(&CallContext::new(), &provider, "Hello!", &[]).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenAiProvider {
    name: &'static str,
    config: OpenAiConfig,
    endpoints: Selector,
    keys: Selector,
}

impl OpenAiProvider {
    /// Creates a provider labelled `openai`.
    pub fn new(config: OpenAiConfig) -> Self {
        Self::with_name("openai", config)
    }

    /// Creates a provider labelled `deepseek` with Deepseek defaults.
    pub fn deepseek() -> Self {
        Self::with_name("deepseek", OpenAiConfig::deepseek())
    }

    /// Creates a `deepseek`-labelled provider from explicit config.
    pub fn deepseek_with(config: OpenAiConfig) -> Self {
        Self::with_name("deepseek", config)
    }

    fn with_name(name: &'static str, mut config: OpenAiConfig) -> Self {
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
            name,
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
        let auth = format!("Bearer {}", self.keys.next());
        headers.insert(
            "authorization",
            HeaderValue::from_str(&auth).map_err(|_| {
                LlmError::new(
                    ErrorKind::Unauthorized,
                    "API key contains invalid header characters",
                )
            })?,
        );
        Ok(headers)
    }
}

impl Llm for OpenAiProvider {
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

    #[instrument(skip_all, fields(provider = self.name, model = %self.config.model))]
    async fn generate(&self, cx: &CallContext, body: &[u8]) -> Result<Value, LlmError> {
        require_api_key(&self.keys, self.name)?;

        let body = normalize_body(self, body)?;
        let body = set_stream_flag(&body, false);
        redact::log_request_body(&body);

        let value = retry::run(self.name, self.config.max_retries, || async {
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

    #[instrument(skip_all, fields(provider = self.name, model = %self.config.model))]
    async fn stream(
        &self,
        cx: &CallContext,
        body: &[u8],
        on_chunk: Option<ChunkHandler>,
    ) -> Result<FinalReceiver, LlmError> {
        require_api_key(&self.keys, self.name)?;

        let body = normalize_body(self, body)?;
        let (body, streaming) = reconcile_stream(&body, on_chunk.is_some());
        redact::log_request_body(&body);

        if !streaming {
            let value = self.generate(cx, &body).await?;
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let _ = tx.try_send(value);
            return Ok(rx);
        }

        let response = retry::run(self.name, self.config.max_retries, || async {
            let url = self.request_url();
            let headers = self.headers()?;
            transport::open_stream(cx, &url, headers, &body).await
        })
        .await?;

        Ok(stream_engine::drive(
            transport::byte_stream(response),
            OpenAiDecoder,
            StreamOptions {
                timeout: self.config.stream_timeout,
                on_chunk: merge_chunk_handlers(self.config.on_message.clone(), on_chunk),
                cancel: cx.cancel_token().clone(),
            },
        ))
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, LlmError> {
        if let Some(calls) = body
            .pointer("/choices/0/message/tool_calls")
            .and_then(Value::as_array)
        {
            if !calls.is_empty() {
                let tools = calls
                    .iter()
                    .map(|call| ToolCall {
                        name: call
                            .pointer("/function/name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                        args: call
                            .pointer("/function/arguments")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                    })
                    .collect();
                return Ok(ProviderResponse::from_tools(tools));
            }
        }

        let Some(content) = body.pointer("/choices/0/message/content") else {
            return Err(LlmError::new(
                ErrorKind::InvalidResponse,
                format!("error parsing response: {body}"),
            ));
        };
        let text = content.as_str().unwrap_or_default();
        if text.trim().is_empty() {
            return Err(LlmError::new(
                ErrorKind::InvalidResponse,
                "empty response from API",
            ));
        }
        Ok(ProviderResponse::from_content(text.as_bytes().to_vec()))
    }
}
