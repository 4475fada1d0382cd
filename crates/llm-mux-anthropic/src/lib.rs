//! Anthropic Messages provider for `llm-mux`.
//!
//! Dialect summary: system turns collapse into the top-level `system`
//! field, message content is an array of text blocks, `max_tokens` is
//! mandatory (default 1024), auth uses `x-api-key` plus the
//! `anthropic-version` header, and streams are typed SSE events
//! terminated by `message_stop` or a `stop_reason`.

mod config;
mod decoder;
mod provider;

pub use config::AnthropicConfig;
pub use decoder::AnthropicDecoder;
pub use provider::AnthropicProvider;
