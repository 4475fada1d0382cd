//! Ollama provider for `llm-mux`.
//!
//! Targets a local (or proxied) Ollama server's `/api/chat` endpoint.
//! No API key is required; a configured one is sent as a bearer token.
//! Streaming is newline-delimited JSON terminated by `{"done":true}`.

mod config;
mod decoder;
mod provider;

pub use config::OllamaConfig;
pub use decoder::OllamaDecoder;
pub use provider::OllamaProvider;
