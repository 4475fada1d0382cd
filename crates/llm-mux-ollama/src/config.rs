//! Ollama provider configuration.

use std::time::Duration;

use llm_mux::ChunkHandler;
use llm_mux::env::env_or;

/// Configuration for [`OllamaProvider`](crate::OllamaProvider).
///
/// [`Default`] reads the `OLLAMA_*` environment variables. Ollama runs
/// locally and needs no API key; [`api_key`](Self::api_key) is only
/// sent (as a bearer token) when non-empty, for proxied deployments.
#[derive(Clone)]
pub struct OllamaConfig {
    /// Model identifier.
    pub model: String,
    /// Base URL; comma-separated URLs rotate per request.
    pub base_url: String,
    /// Optional bearer token for proxied deployments.
    pub api_key: String,
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

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model: env_or("OLLAMA_MODEL", "qwen2.5:3b"),
            base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
            api_key: env_or("OLLAMA_API_KEY", ""),
            temperature: 0.48,
            stream: false,
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(60),
            on_message: None,
        }
    }
}

impl std::fmt::Debug for OllamaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("temperature", &self.temperature)
            .field("stream", &self.stream)
            .field("max_retries", &self.max_retries)
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
    fn test_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.temperature, 0.48);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = OllamaConfig {
            api_key: "proxy-token-value".into(),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("proxy-token-value"));
    }
}
