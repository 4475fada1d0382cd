//! Gemini `generateContent` [`Llm`] implementation.

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

use crate::config::GeminiConfig;
use crate::decoder::GeminiDecoder;

/// Provider for the Google Gemini `generateContent` API.
///
/// Dialect notes: conversations are `contents` of role-tagged `parts`
/// (`assistant` maps to `model`), system turns fold into the first
/// user turn prefixed with `System: `, sampling rides in
/// `generationConfig`, and the four standard safety categories default
/// to `BLOCK_NONE`. Auth rides in the `x-goog-api-key` header.
#[derive(Debug)]
pub struct GeminiProvider {
    config: GeminiConfig,
    endpoints: Selector,
    keys: Selector,
}

impl GeminiProvider {
    /// Creates a provider, clamping temperature and deriving the API
    /// path from the model when unset.
    pub fn new(mut config: GeminiConfig) -> Self {
        if config.api_key.is_empty() {
            tracing::warn!("GEMINI_API_KEY not set, provider will be non-functional");
        }
        if !(0.0..=2.0).contains(&config.temperature) {
            tracing::warn!(
                temperature = config.temperature,
                "temperature out of [0, 2], clamping"
            );
            config.temperature = config.temperature.clamp(0.0, 2.0);
        }
        if config.api_path.is_empty() {
            let model_part = config.model.replace(':', "/");
            config.api_path = format!("/v1beta/models/{model_part}:generateContent");
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
            "x-goog-api-key",
            HeaderValue::from_str(self.keys.next()).map_err(|_| {
                LlmError::new(
                    ErrorKind::Unauthorized,
                    "API key contains invalid header characters",
                )
            })?,
        );
        Ok(headers)
    }
}

/// Folds a system turn into the conversation under construction.
///
/// The first system turn opens a user turn prefixed `System: `; later
/// ones append a new part to that leading user turn.
fn fold_system_turn(contents: &mut Vec<Value>, text: &str) {
    if contents.is_empty() {
        contents.push(json!({
            "role": "user",
            "parts": [{"text": format!("System: {text}")}],
        }));
        return;
    }
    if contents[0]["role"] == "user" {
        if let Some(parts) = contents[0]["parts"].as_array_mut() {
            parts.push(json!({"text": format!("\n\nSystem: {text}")}));
        }
    }
}

impl Llm for GeminiProvider {
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

        let mut generation_config = serde_json::Map::new();
        generation_config.insert("temperature".into(), json!(self.config.temperature));
        if self.config.max_tokens > 0 {
            generation_config.insert("maxOutputTokens".into(), json!(self.config.max_tokens));
        }
        if self.config.top_p > 0.0 {
            generation_config.insert("topP".into(), json!(self.config.top_p));
        }
        if self.config.top_k > 0 {
            generation_config.insert("topK".into(), json!(self.config.top_k));
        }

        let mut contents: Vec<Value> = Vec::with_capacity(messages.len());
        for message in messages.history() {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System => {
                    fold_system_turn(&mut contents, &message.content);
                    continue;
                }
            };
            contents.push(json!({
                "role": role,
                "parts": [{"text": message.content}],
            }));
        }

        let mut request = serde_json::Map::new();
        request.insert("contents".into(), Value::Array(contents));
        request.insert(
            "generationConfig".into(),
            Value::Object(generation_config),
        );
        request.insert(
            "safetySettings".into(),
            json!([
                {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE"},
            ]),
        );

        for mutator in mutators {
            mutator(&mut request);
        }

        serde_json::to_vec(&Value::Object(request)).map_err(Into::into)
    }

    #[instrument(skip_all, fields(provider = "gemini", model = %self.config.model))]
    async fn generate(&self, cx: &CallContext, body: &[u8]) -> Result<Value, LlmError> {
        require_api_key(&self.keys, "gemini")?;

        let body = normalize_body(self, body)?;
        let body = set_stream_flag(&body, false);
        redact::log_request_body(&body);

        let value = retry::run("gemini", self.config.max_retries, || async {
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

    #[instrument(skip_all, fields(provider = "gemini", model = %self.config.model))]
    async fn stream(
        &self,
        cx: &CallContext,
        body: &[u8],
        on_chunk: Option<ChunkHandler>,
    ) -> Result<FinalReceiver, LlmError> {
        require_api_key(&self.keys, "gemini")?;

        let body = normalize_body(self, body)?;
        let (body, streaming) = reconcile_stream(&body, on_chunk.is_some());
        redact::log_request_body(&body);

        if !streaming {
            let value = self.generate(cx, &body).await?;
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let _ = tx.try_send(value);
            return Ok(rx);
        }

        let response = retry::run("gemini", self.config.max_retries, || async {
            let url = self.request_url();
            let headers = self.headers()?;
            transport::open_stream(cx, &url, headers, &body).await
        })
        .await?;

        Ok(stream_engine::drive(
            transport::byte_stream(response),
            GeminiDecoder,
            StreamOptions {
                timeout: self.config.stream_timeout,
                on_chunk: merge_chunk_handlers(self.config.on_message.clone(), on_chunk),
                cancel: cx.cancel_token().clone(),
            },
        ))
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, LlmError> {
        if let Some(message) = body.pointer("/error/message") {
            let message = message.as_str().unwrap_or("unknown error");
            return Err(LlmError::new(ErrorKind::Unknown, message.to_owned()));
        }

        let candidates = body.get("candidates").and_then(Value::as_array);
        if candidates.is_none_or(Vec::is_empty) {
            return Err(LlmError::new(
                ErrorKind::InvalidResponse,
                "no candidates in response",
            ));
        }

        let text = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(ProviderResponse::from_content(text.as_bytes().to_vec()))
    }
}
