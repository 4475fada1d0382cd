//! Per-call context: cancellation plus call-scoped settings.
//!
//! A [`CallContext`] threads through every operation on a provider. It
//! carries the cancellation token honored at every suspension point,
//! the overall deadline, and the small set of call-scoped values the
//! tool driver consults (tool permission, runner, result formatter,
//! iteration cap). Everything is explicit — no process-global state
//! beyond the HTTP client and the debug flag.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::tool_runner::{ToolResultFormatter, ToolRunner};

/// Default cap on tool-call loop iterations.
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 3;

/// Default overall deadline for a completion call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Cancellation handle and call-scoped settings for one logical call.
///
/// Cheap to clone; clones share the same cancellation token.
///
/// ```rust
/// use std::time::Duration;
/// use llm_mux::CallContext;
///
/// let cx = CallContext::new()
///     .with_timeout(Duration::from_secs(20))
///     .with_max_tool_iterations(5)
///     .with_allow_tools(false);
/// ```
#[derive(Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    /// Overall deadline for the call. `None` means [`DEFAULT_TIMEOUT`].
    pub timeout: Option<Duration>,
    /// Whether the driver may execute tool calls. Defaults to `true`.
    pub allow_tools: bool,
    /// The executor invoked for each tool call, if any.
    pub tool_runner: Option<Arc<dyn ToolRunner>>,
    /// Serializer for tool results fed back to the model. `None` uses
    /// the default JSON-array formatter.
    pub tool_result_formatter: Option<ToolResultFormatter>,
    /// Cap on tool-loop iterations. Defaults to
    /// [`DEFAULT_MAX_TOOL_ITERATIONS`].
    pub max_tool_iterations: usize,
}

impl CallContext {
    /// Creates a context with default settings and a fresh token.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            timeout: None,
            allow_tools: true,
            tool_runner: None,
            tool_result_formatter: None,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    /// Creates a context tied to an existing cancellation token.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::new()
        }
    }

    /// Sets the overall deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Allows or forbids tool execution.
    #[must_use]
    pub fn with_allow_tools(mut self, allow: bool) -> Self {
        self.allow_tools = allow;
        self
    }

    /// Binds the tool executor.
    #[must_use]
    pub fn with_tool_runner(mut self, runner: Arc<dyn ToolRunner>) -> Self {
        self.tool_runner = Some(runner);
        self
    }

    /// Replaces the tool-result serializer.
    #[must_use]
    pub fn with_tool_result_formatter(mut self, formatter: ToolResultFormatter) -> Self {
        self.tool_result_formatter = Some(formatter);
        self
    }

    /// Sets the tool-loop iteration cap.
    #[must_use]
    pub fn with_max_tool_iterations(mut self, n: usize) -> Self {
        self.max_tool_iterations = n;
        self
    }

    /// The cancellation token shared by all clones of this context.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Requests cancellation of every operation using this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves the effective deadline for this call.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("timeout", &self.timeout)
            .field("allow_tools", &self.allow_tools)
            .field("has_tool_runner", &self.tool_runner.is_some())
            .field("has_formatter", &self.tool_result_formatter.is_some())
            .field("max_tool_iterations", &self.max_tool_iterations)
            .finish()
    }
}
