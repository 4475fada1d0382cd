//! # llm-mux
//!
//! Provider-agnostic core for multi-endpoint chat-completion clients.
//!
//! This crate holds everything the concrete provider crates share: the
//! neutral conversation model, the [`Llm`] capability set, the closed
//! error taxonomy, multi-key/multi-endpoint rotation, the pooled HTTP
//! transport, the generic streaming engine, the retry orchestrator, and
//! the bounded tool-call loop. It contains **zero** provider-specific
//! code — dialects live in the sibling crates and implement [`Llm`].
//!
//! # Provider crates
//!
//! | Crate | Dialect |
//! |-------|---------|
//! | `llm-mux-openai` | OpenAI-compatible Chat Completions (also Deepseek) |
//! | `llm-mux-anthropic` | Anthropic Messages |
//! | `llm-mux-gemini` | Google Gemini `generateContent` |
//! | `llm-mux-ollama` | Ollama `/api/chat` (NDJSON streaming) |
//!
//! # Quick start
//!
//! ```rust,no_run
//! use llm_mux::{CallContext, Llm, complete_prompt};
//!
//! # async fn example(llm: impl Llm) -> Result<(), llm_mux::LlmError> {
//! let cx = CallContext::new();
//! let answer = complete_prompt(&cx, &llm, "Explain ownership in Rust", &[]).await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`message`] | Neutral conversation model and output formats |
//! | [`provider`] | The [`Llm`] trait, [`DynLlm`], and adapter helpers |
//! | [`error`] | The closed [`LlmError`] taxonomy |
//! | [`context`] | Per-call cancellation and tool settings |
//! | [`selector`] | Shuffle-once rotation over multi-valued config |
//! | [`transport`] | The process-wide HTTP client |
//! | [`sse`] | SSE / NDJSON frame splitting |
//! | [`stream_engine`] | The generic decoder-driven stream loop |
//! | [`retry`] | Exponential-backoff retry loop |
//! | [`tool_runner`] | Tool execution seam and the map runner |
//! | [`complete`] | High-level completion helpers |
//! | [`balancer`] | Provider pool with run-and-mark failover |

pub mod balancer;
pub mod complete;
pub mod context;
pub mod debug;
pub mod env;
pub mod error;
pub mod message;
pub mod provider;
pub mod redact;
pub mod retry;
pub mod selector;
pub mod sse;
pub mod stream_engine;
pub mod tool_runner;
pub mod transport;

mod driver;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use balancer::{Balancer, balancer_complete, balancer_complete_json};
pub use complete::{complete, complete_json, complete_prompt, parse_json_response};
pub use context::{CallContext, DEFAULT_MAX_TOOL_ITERATIONS, DEFAULT_TIMEOUT};
pub use debug::{is_debug, set_debug};
pub use error::{ErrorKind, LlmError};
pub use message::{Message, Messages, OutputFormat, Role, json_field_format};
pub use provider::{
    ChunkHandler, DynLlm, FinalReceiver, JsonMap, Llm, ProviderResponse, RequestMutator, ToolCall,
    with_tool_hint,
};
pub use selector::Selector;
pub use sse::{Framing, SseEvent};
pub use stream_engine::{DEFAULT_STREAM_TIMEOUT, StreamDecoder, StreamOptions, StreamStep};
pub use tool_runner::{
    MapToolHandler, MapToolRunner, ToolResultFormatter, ToolResultRecord, ToolRunner,
    default_tool_result_formatter,
};
pub use transport::set_client;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockLlm;
