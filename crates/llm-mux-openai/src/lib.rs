//! OpenAI-compatible provider for `llm-mux`.
//!
//! Speaks the Chat Completions dialect: bearer auth, request bodies of
//! `{model, stream, temperature, messages}`, responses under
//! `choices[0].message`, and SSE streaming terminated by `[DONE]`.
//! Deepseek exposes the same dialect and is served by this crate via
//! [`OpenAiProvider::deepseek`].
//!
//! ```rust,no_run
//! use llm_mux::{CallContext, complete_prompt};
//! use llm_mux_openai::{OpenAiConfig, OpenAiProvider};
//!
//! # async fn example() -> Result<(), llm_mux::LlmError> {
//! let provider = OpenAiProvider::new(OpenAiConfig::default());
//! let answer = complete_prompt(&CallContext::new(), &provider, "Hello!", &[]).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod decoder;
mod provider;

pub use config::OpenAiConfig;
pub use decoder::OpenAiDecoder;
pub use provider::OpenAiProvider;
