//! Tool execution seam.
//!
//! When a model responds with tool calls instead of text, the driver
//! hands each call to the [`ToolRunner`] bound on the call context.
//! Results (including per-tool failures) are collected into
//! [`ToolResultRecord`]s, serialized by a [`ToolResultFormatter`], and
//! fed back to the model as a new user turn.
//!
//! [`MapToolRunner`] is the stock implementation: a name → handler map.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::context::CallContext;
use crate::error::{ErrorKind, LlmError};

/// The outcome of one tool invocation, as reported back to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResultRecord {
    /// Tool name, as requested by the model.
    pub name: String,
    /// Raw JSON arguments, exactly as the model produced them.
    pub args: String,
    /// The tool's output (empty when the tool failed).
    pub result: String,
    /// The failure message, when the tool failed.
    pub error: Option<String>,
}

/// Serializes a batch of tool results into the text fed back to the model.
pub type ToolResultFormatter = Arc<dyn Fn(&[ToolResultRecord]) -> String + Send + Sync>;

/// The default formatter: a JSON array of `{tool, args, result[, error]}`.
///
/// Args and results that are themselves valid JSON are embedded as JSON
/// values rather than double-encoded strings.
pub fn default_tool_result_formatter(results: &[ToolResultRecord]) -> String {
    let items: Vec<Value> = results
        .iter()
        .map(|r| {
            let mut obj = serde_json::Map::new();
            obj.insert("tool".into(), Value::String(r.name.clone()));
            obj.insert("args".into(), try_json(&r.args));
            obj.insert("result".into(), try_json(&r.result));
            if let Some(err) = &r.error {
                obj.insert("error".into(), Value::String(err.clone()));
            }
            Value::Object(obj)
        })
        .collect();
    Value::Array(items).to_string()
}

/// Parses `s` as JSON when possible, otherwise wraps it as a string.
fn try_json(s: &str) -> Value {
    if s.is_empty() {
        return Value::String(String::new());
    }
    serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_owned()))
}

/// Executes a named tool call on behalf of the model.
///
/// Object safe: the async method returns a boxed future, so runners can
/// live behind `Arc<dyn ToolRunner>` on the call context.
pub trait ToolRunner: Send + Sync {
    /// Runs the tool named `name` with raw JSON `args`, returning its
    /// textual output.
    fn run<'a>(
        &'a self,
        cx: &'a CallContext,
        name: &'a str,
        args: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>>;
}

/// Handler signature for [`MapToolRunner`]. Receives the parsed
/// arguments (the raw string when they are not valid JSON).
pub type MapToolHandler = Arc<dyn Fn(&CallContext, Value) -> Result<String, LlmError> + Send + Sync>;

/// A [`ToolRunner`] backed by a name → handler map.
///
/// ```rust
/// use std::sync::Arc;
/// use llm_mux::{MapToolRunner, MapToolHandler};
///
/// let mut runner = MapToolRunner::new();
/// runner.register("echo", Arc::new(|_cx: &llm_mux::CallContext, args: serde_json::Value| {
///     Ok(args["text"].as_str().unwrap_or_default().to_owned())
/// }) as MapToolHandler);
/// ```
#[derive(Default)]
pub struct MapToolRunner {
    handlers: HashMap<String, MapToolHandler>,
}

impl MapToolRunner {
    /// Creates a runner with no registered tools.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a handler for `name`.
    pub fn register(&mut self, name: impl Into<String>, handler: MapToolHandler) {
        self.handlers.insert(name.into(), handler);
    }

    /// Names of all registered tools, unordered.
    pub fn tool_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl ToolRunner for MapToolRunner {
    fn run<'a>(
        &'a self,
        cx: &'a CallContext,
        name: &'a str,
        args: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            let handler = self.handlers.get(name).ok_or_else(|| {
                LlmError::new(ErrorKind::Unknown, format!("unknown tool: {name}"))
            })?;
            handler(cx, try_json(args))
        })
    }
}

impl std::fmt::Debug for MapToolRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapToolRunner")
            .field("tools", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
