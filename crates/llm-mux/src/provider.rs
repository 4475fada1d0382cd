//! The provider capability set.
//!
//! Every backend implements [`Llm`]: shape a neutral conversation into
//! wire bytes, dispatch them, and translate the reply back into a
//! neutral [`ProviderResponse`]. The trait uses native
//! async-fn-in-traits; [`DynLlm`] is the object-safe mirror with boxed
//! futures, bridged by a blanket impl, for storing providers behind
//! `Arc<dyn _>` (the balancer does exactly that).
//!
//! # Request mutators
//!
//! [`prepare_request`](Llm::prepare_request) builds a JSON object and
//! then applies caller-supplied [`RequestMutator`]s before serializing.
//! This is how call-time concerns (tool descriptors, sampling
//! overrides) reach the wire without the adapter knowing about them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::CallContext;
use crate::error::{ErrorKind, LlmError};
use crate::message::Messages;
use crate::selector::Selector;

/// A JSON object under construction — the neutral request.
pub type JsonMap = serde_json::Map<String, Value>;

/// A caller-supplied transformation of the neutral request.
pub type RequestMutator = Arc<dyn Fn(&mut JsonMap) + Send + Sync>;

/// Per-chunk streaming callback: receives the extracted text fragment
/// and the raw frame it came from.
pub type ChunkHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Receiver for a stream's final aggregated response.
///
/// Delivers at most one value and then closes; closes without a value
/// on cancellation, timeout, or stream failure.
pub type FinalReceiver = tokio::sync::mpsc::Receiver<Value>;

/// A tool invocation requested by the model.
///
/// `args` is the raw JSON argument text, deliberately left unparsed to
/// preserve provider fidelity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// The tool's name.
    pub name: String,
    /// Raw JSON arguments.
    pub args: String,
}

/// A parsed provider reply: either final text or tool calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderResponse {
    /// The model's text, when it answered directly.
    pub content: Vec<u8>,
    /// The requested tool calls, when it asked for tools instead.
    pub tools: Vec<ToolCall>,
}

impl ProviderResponse {
    /// A text-only response.
    pub fn from_content(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            tools: Vec::new(),
        }
    }

    /// A tools-only response.
    pub fn from_tools(tools: Vec<ToolCall>) -> Self {
        Self {
            content: Vec::new(),
            tools,
        }
    }

    /// Whether the model requested tool calls.
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }
}

/// The capability set every provider adapter implements.
///
/// Cross-cutting concerns (retry, key rotation, stream decoding) are
/// shared machinery in this crate; adapters only know their dialect.
pub trait Llm: Send + Sync {
    /// Shapes the neutral conversation into serialized request bytes,
    /// applying `mutators` to the request object before serialization.
    ///
    /// Fails with [`InvalidRequest`](ErrorKind::InvalidRequest) when the
    /// conversation is empty.
    fn prepare_request(
        &self,
        messages: &Messages,
        mutators: &[RequestMutator],
    ) -> Result<Vec<u8>, LlmError>;

    /// Dispatches `body` and returns the parsed provider JSON.
    ///
    /// Streaming is forced off regardless of the body's `stream` flag.
    fn generate(
        &self,
        cx: &CallContext,
        body: &[u8],
    ) -> impl Future<Output = Result<Value, LlmError>> + Send;

    /// Opens a streaming request, invoking `on_chunk` for every text
    /// fragment, and returns the channel that delivers the aggregated
    /// final response.
    ///
    /// Without a callback the request silently degrades to a one-shot
    /// generate; with a callback the body's `stream` flag is forced on.
    /// `on_chunk` is never invoked after the returned channel closes.
    fn stream(
        &self,
        cx: &CallContext,
        body: &[u8],
        on_chunk: Option<ChunkHandler>,
    ) -> impl Future<Output = Result<FinalReceiver, LlmError>> + Send;

    /// Translates provider JSON into a neutral [`ProviderResponse`].
    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, LlmError>;
}

/// Object-safe mirror of [`Llm`] for dynamic dispatch.
///
/// Every `Llm` implements this via the blanket impl — implement [`Llm`]
/// and use `Arc<dyn DynLlm>` where type erasure is needed.
pub trait DynLlm: Send + Sync {
    /// See [`Llm::prepare_request`].
    fn prepare_request(
        &self,
        messages: &Messages,
        mutators: &[RequestMutator],
    ) -> Result<Vec<u8>, LlmError>;

    /// Boxed-future version of [`Llm::generate`].
    fn generate_boxed<'a>(
        &'a self,
        cx: &'a CallContext,
        body: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Value, LlmError>> + Send + 'a>>;

    /// Boxed-future version of [`Llm::stream`].
    fn stream_boxed<'a>(
        &'a self,
        cx: &'a CallContext,
        body: &'a [u8],
        on_chunk: Option<ChunkHandler>,
    ) -> Pin<Box<dyn Future<Output = Result<FinalReceiver, LlmError>> + Send + 'a>>;

    /// See [`Llm::parse_response`].
    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, LlmError>;
}

impl<T: Llm> DynLlm for T {
    fn prepare_request(
        &self,
        messages: &Messages,
        mutators: &[RequestMutator],
    ) -> Result<Vec<u8>, LlmError> {
        Llm::prepare_request(self, messages, mutators)
    }

    fn generate_boxed<'a>(
        &'a self,
        cx: &'a CallContext,
        body: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Value, LlmError>> + Send + 'a>> {
        Box::pin(self.generate(cx, body))
    }

    fn stream_boxed<'a>(
        &'a self,
        cx: &'a CallContext,
        body: &'a [u8],
        on_chunk: Option<ChunkHandler>,
    ) -> Pin<Box<dyn Future<Output = Result<FinalReceiver, LlmError>> + Send + 'a>> {
        Box::pin(self.stream(cx, body, on_chunk))
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, LlmError> {
        Llm::parse_response(self, body)
    }
}

impl Llm for Arc<dyn DynLlm> {
    fn prepare_request(
        &self,
        messages: &Messages,
        mutators: &[RequestMutator],
    ) -> Result<Vec<u8>, LlmError> {
        self.as_ref().prepare_request(messages, mutators)
    }

    async fn generate(&self, cx: &CallContext, body: &[u8]) -> Result<Value, LlmError> {
        self.as_ref().generate_boxed(cx, body).await
    }

    async fn stream(
        &self,
        cx: &CallContext,
        body: &[u8],
        on_chunk: Option<ChunkHandler>,
    ) -> Result<FinalReceiver, LlmError> {
        self.as_ref().stream_boxed(cx, body, on_chunk).await
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, LlmError> {
        self.as_ref().parse_response(body)
    }
}

/// Mutator that injects tool descriptors into the request, defaulting
/// `tool_choice` to `"auto"` when the caller did not set one.
pub fn with_tool_hint(tools: Value) -> RequestMutator {
    Arc::new(move |req: &mut JsonMap| {
        if !tools.is_null() {
            req.insert("tools".into(), tools.clone());
        }
        req.entry("tool_choice".to_owned())
            .or_insert_with(|| Value::String("auto".into()));
    })
}

// ── Adapter helpers ─────────────────────────────────────────────────
//
// Shared plumbing every dialect needs: raw-prompt auto-wrapping, the
// stream-flag convenience contract, callback merging, and the key
// pre-flight check.

/// Ensures `body` is a serialized request.
///
/// Raw non-JSON input is wrapped as a single user message and run
/// through the adapter's own `prepare_request`, so callers may pass a
/// bare prompt where a request body is expected.
pub fn normalize_body<L: Llm + ?Sized>(llm: &L, body: &[u8]) -> Result<Vec<u8>, LlmError> {
    if serde_json::from_slice::<Value>(body).is_ok() {
        return Ok(body.to_vec());
    }
    let messages = Messages::from_prompt(String::from_utf8_lossy(body));
    llm.prepare_request(&messages, &[])
}

/// Reads the body's `stream` flag.
pub fn stream_flag(body: &[u8]) -> bool {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("stream").and_then(Value::as_bool))
        .unwrap_or(false)
}

/// Rewrites the body's `stream` flag.
pub fn set_stream_flag(body: &[u8], stream: bool) -> Vec<u8> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(mut map)) => {
            map.insert("stream".into(), Value::Bool(stream));
            Value::Object(map).to_string().into_bytes()
        }
        _ => body.to_vec(),
    }
}

/// Applies the stream-flag convenience contract.
///
/// A streaming body without a chunk callback degrades to non-streaming;
/// a callback without a streaming body upgrades to streaming. Returns
/// the (possibly rewritten) body and the effective mode.
pub fn reconcile_stream(body: &[u8], has_callback: bool) -> (Vec<u8>, bool) {
    let requested = stream_flag(body);
    match (requested, has_callback) {
        (true, false) => (set_stream_flag(body, false), false),
        (false, true) => (set_stream_flag(body, true), true),
        (mode, _) => (body.to_vec(), mode),
    }
}

/// Combines the adapter-configured callback with the caller's.
///
/// Both see every chunk; the configured one runs first.
pub fn merge_chunk_handlers(
    configured: Option<ChunkHandler>,
    caller: Option<ChunkHandler>,
) -> Option<ChunkHandler> {
    match (configured, caller) {
        (None, None) => None,
        (Some(h), None) | (None, Some(h)) => Some(h),
        (Some(a), Some(b)) => Some(Arc::new(move |chunk: &str, raw: &[u8]| {
            a(chunk, raw);
            b(chunk, raw);
        })),
    }
}

/// Pre-flight key check: providers that require authentication return
/// [`Unauthorized`](ErrorKind::Unauthorized) before any network call.
pub fn require_api_key(keys: &Selector, provider: &str) -> Result<(), LlmError> {
    if keys.is_empty() {
        return Err(LlmError::new(
            ErrorKind::Unauthorized,
            format!("{provider} api key is required"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_tool_hint_sets_tools_and_default_choice() {
        let mutator = with_tool_hint(serde_json::json!([{"name": "echo"}]));
        let mut req = JsonMap::new();
        mutator(&mut req);
        assert_eq!(req["tools"][0]["name"], "echo");
        assert_eq!(req["tool_choice"], "auto");
    }

    #[test]
    fn test_tool_hint_keeps_existing_choice() {
        let mutator = with_tool_hint(serde_json::json!([]));
        let mut req = JsonMap::new();
        req.insert("tool_choice".into(), Value::String("none".into()));
        mutator(&mut req);
        assert_eq!(req["tool_choice"], "none");
    }

    #[test]
    fn test_stream_flag_roundtrip() {
        let body = br#"{"model":"m","stream":true}"#;
        assert!(stream_flag(body));
        let off = set_stream_flag(body, false);
        assert!(!stream_flag(&off));
    }

    #[test]
    fn test_stream_flag_defaults_false() {
        assert!(!stream_flag(br#"{"model":"m"}"#));
        assert!(!stream_flag(b"not json"));
    }

    #[test]
    fn test_reconcile_disables_without_callback() {
        let (body, mode) = reconcile_stream(br#"{"stream":true}"#, false);
        assert!(!mode);
        assert!(!stream_flag(&body));
    }

    #[test]
    fn test_reconcile_enables_with_callback() {
        let (body, mode) = reconcile_stream(br#"{"stream":false}"#, true);
        assert!(mode);
        assert!(stream_flag(&body));
    }

    #[test]
    fn test_reconcile_leaves_matching_modes() {
        let (_, mode) = reconcile_stream(br#"{"stream":true}"#, true);
        assert!(mode);
        let (_, mode) = reconcile_stream(br#"{"stream":false}"#, false);
        assert!(!mode);
    }

    #[test]
    fn test_merge_chunk_handlers_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&counter);
        let c2 = Arc::clone(&counter);
        let first: ChunkHandler = Arc::new(move |_, _| {
            // first handler must observe the counter before the second bumps it
            assert_eq!(c1.load(Ordering::SeqCst) % 2, 0);
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let second: ChunkHandler = Arc::new(move |_, _| {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        let merged = merge_chunk_handlers(Some(first), Some(second)).unwrap();
        merged("x", b"x");
        merged("y", b"y");
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_require_api_key() {
        let empty = Selector::parse("");
        let err = require_api_key(&empty, "openai").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert!(err.message.contains("openai api key is required"));

        let ok = Selector::parse("sk-x");
        assert!(require_api_key(&ok, "openai").is_ok());
    }

    #[test]
    fn test_provider_response_exclusivity() {
        let text = ProviderResponse::from_content(b"hi".to_vec());
        assert!(!text.has_tools());
        let tools = ProviderResponse::from_tools(vec![ToolCall {
            name: "echo".into(),
            args: "{}".into(),
        }]);
        assert!(tools.has_tools());
        assert!(tools.content.is_empty());
    }
}
