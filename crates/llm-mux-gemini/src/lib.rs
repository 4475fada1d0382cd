//! Google Gemini provider for `llm-mux`.
//!
//! Dialect summary: conversations become `contents` of role-tagged
//! `parts` with `assistant` mapped to `model` and system turns folded
//! into the first user turn, sampling lives in `generationConfig`,
//! safety categories default to `BLOCK_NONE`, and auth rides in the
//! `x-goog-api-key` header.

mod config;
mod decoder;
mod provider;

pub use config::GeminiConfig;
pub use decoder::GeminiDecoder;
pub use provider::GeminiProvider;
