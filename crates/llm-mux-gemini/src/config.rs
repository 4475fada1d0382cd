//! Gemini provider configuration.

use std::time::Duration;

use llm_mux::ChunkHandler;
use llm_mux::env::env_or;

/// Configuration for [`GeminiProvider`](crate::GeminiProvider).
///
/// [`Default`] reads the `GEMINI_*` environment variables. An empty
/// [`api_path`](Self::api_path) is derived from the model at
/// construction (`/v1beta/models/<model>:generateContent`).
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key; comma-separated keys rotate per request.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Base URL; comma-separated URLs rotate per request.
    pub base_url: String,
    /// Path appended to the selected base URL; empty derives from the
    /// model.
    pub api_path: String,
    /// Sampling temperature, clamped into [0, 2] at construction.
    pub temperature: f64,
    /// Default streaming mode for prepared requests.
    pub stream: bool,
    /// Extra attempts after the first failed request.
    pub max_retries: u32,
    /// `maxOutputTokens`; 0 leaves it unset.
    pub max_tokens: u32,
    /// Nucleus sampling `topP`; 0 leaves it unset.
    pub top_p: f64,
    /// `topK` candidate cut; 0 leaves it unset.
    pub top_k: u32,
    /// Per-attempt deadline for non-streaming requests.
    pub request_timeout: Duration,
    /// Deadline for a whole streaming response.
    pub stream_timeout: Duration,
    /// Adapter-level chunk callback, merged with the caller's.
    pub on_message: Option<ChunkHandler>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: env_or("GEMINI_API_KEY", ""),
            model: env_or("GEMINI_MODEL", "gemini-2.0-flash"),
            base_url: env_or("GEMINI_BASE_URL", "https://generativelanguage.googleapis.com"),
            api_path: env_or("GEMINI_API_URL", ""),
            temperature: 0.5,
            stream: false,
            max_retries: 3,
            max_tokens: 0,
            top_p: 0.95,
            top_k: 32,
            request_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(60),
            on_message: None,
        }
    }
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_path", &self.api_path)
            .field("temperature", &self.temperature)
            .field("stream", &self.stream)
            .field("max_retries", &self.max_retries)
            .field("max_tokens", &self.max_tokens)
            .field("top_p", &self.top_p)
            .field("top_k", &self.top_k)
            .field("request_timeout", &self.request_timeout)
            .field("stream_timeout", &self.stream_timeout)
            .field("has_on_message", &self.on_message.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_api_key() {
        let config = GeminiConfig {
            api_key: "AIza-secret".into(),
            ..Default::default()
        };
        let out = format!("{config:?}");
        assert!(!out.contains("AIza-secret"));
    }

    #[test]
    fn test_sampling_defaults() {
        let config = GeminiConfig::default();
        assert_eq!(config.top_p, 0.95);
        assert_eq!(config.top_k, 32);
        assert_eq!(config.max_tokens, 0);
    }
}
