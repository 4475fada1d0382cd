//! Anthropic provider configuration.

use std::time::Duration;

use llm_mux::ChunkHandler;
use llm_mux::env::env_or;

/// Configuration for [`AnthropicProvider`](crate::AnthropicProvider).
///
/// [`Default`] reads the `ANTHROPIC_*` environment variables; every
/// field can be overridden in code with struct-update syntax.
#[derive(Clone)]
pub struct AnthropicConfig {
    /// API key; comma-separated keys rotate per request.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Base URL; comma-separated URLs rotate per request.
    pub base_url: String,
    /// Path appended to the selected base URL.
    pub api_path: String,
    /// `anthropic-version` header value.
    pub version: String,
    /// Sampling temperature, clamped into [0, 2] at construction.
    pub temperature: f64,
    /// Default streaming mode for prepared requests.
    pub stream: bool,
    /// Extra attempts after the first failed request.
    pub max_retries: u32,
    /// Mandatory `max_tokens` for the Messages API.
    pub max_tokens: u32,
    /// Per-attempt deadline for non-streaming requests.
    pub request_timeout: Duration,
    /// Deadline for a whole streaming response.
    pub stream_timeout: Duration,
    /// Adapter-level chunk callback, merged with the caller's.
    pub on_message: Option<ChunkHandler>,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: env_or("ANTHROPIC_API_KEY", ""),
            model: env_or("ANTHROPIC_MODEL", "claude-3-5-sonnet-latest"),
            base_url: env_or("ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
            api_path: env_or("ANTHROPIC_API_URL", "/v1/messages"),
            version: env_or("ANTHROPIC_VERSION", "2023-06-01"),
            temperature: 0.5,
            stream: false,
            max_retries: 3,
            max_tokens: 1024,
            request_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(60),
            on_message: None,
        }
    }
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_path", &self.api_path)
            .field("version", &self.version)
            .field("temperature", &self.temperature)
            .field("stream", &self.stream)
            .field("max_retries", &self.max_retries)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout", &self.request_timeout)
            .field("stream_timeout", &self.stream_timeout)
            .field("has_on_message", &self.on_message.is_some())
            .finish()
    }
}
