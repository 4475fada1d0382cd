//! OpenAI-compatible provider configuration.

use std::time::Duration;

use llm_mux::ChunkHandler;
use llm_mux::env::env_or;

/// Configuration for [`OpenAiProvider`](crate::OpenAiProvider).
///
/// [`Default`] reads the `OPENAI_*` environment variables;
/// [`deepseek`](Self::deepseek) reads `DEEPSEEK_*` instead. Every field
/// can be overridden in code with struct-update syntax:
///
/// ```rust
/// use llm_mux_openai::OpenAiConfig;
///
/// let config = OpenAiConfig {
///     api_key: "sk-...".into(),
///     model: "gpt-4o-mini".into(),
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct OpenAiConfig {
    /// API key; comma-separated keys rotate per request.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Base URL; comma-separated URLs rotate per request.
    pub base_url: String,
    /// Path appended to the selected base URL.
    pub api_path: String,
    /// Sampling temperature, clamped into [0, 2] at construction.
    pub temperature: f64,
    /// Default streaming mode for prepared requests.
    pub stream: bool,
    /// Extra attempts after the first failed request.
    pub max_retries: u32,
    /// Per-attempt deadline for non-streaming requests.
    pub request_timeout: Duration,
    /// Deadline for a whole streaming response.
    pub stream_timeout: Duration,
    /// Adapter-level chunk callback, merged with the caller's.
    pub on_message: Option<ChunkHandler>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: env_or("OPENAI_API_KEY", ""),
            model: env_or("OPENAI_MODEL", "gpt-3.5-turbo"),
            base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            api_path: env_or("OPENAI_API_URL", "/chat/completions"),
            temperature: 0.5,
            stream: false,
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(60),
            on_message: None,
        }
    }
}

impl OpenAiConfig {
    /// Deepseek speaks the same dialect; only the defaults differ.
    pub fn deepseek() -> Self {
        Self {
            api_key: env_or("DEEPSEEK_API_KEY", ""),
            model: env_or("DEEPSEEK_MODEL", "deepseek-chat"),
            base_url: env_or("DEEPSEEK_BASE_URL", "https://api.deepseek.com"),
            api_path: "/chat/completions".into(),
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_path", &self.api_path)
            .field("temperature", &self.temperature)
            .field("stream", &self.stream)
            .field("max_retries", &self.max_retries)
            .field("request_timeout", &self.request_timeout)
            .field("stream_timeout", &self.stream_timeout)
            .field("has_on_message", &self.on_message.is_some())
            .finish()
    }
}
