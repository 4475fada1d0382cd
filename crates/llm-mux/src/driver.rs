//! The tool-call loop.
//!
//! A model reply either carries final text or a batch of tool calls.
//! [`Interaction`] drives the cycle: generate → parse → if tools were
//! requested, execute them in order, feed the results back as a new
//! user turn, re-serialize the request, and generate again — bounded
//! by the context's iteration cap. Tool-level failures are captured in
//! the result record and forwarded to the model; only infrastructure
//! failures abort the loop.
//!
//! Each generating step has its own small retry budget for transient
//! errors, separate from (and on top of) the per-request retry loop in
//! [`retry`](crate::retry).

use std::time::Duration;

use crate::context::CallContext;
use crate::error::{ErrorKind, LlmError};
use crate::message::Messages;
use crate::provider::{Llm, ProviderResponse, RequestMutator, ToolCall};
use crate::tool_runner::{ToolResultRecord, default_tool_result_formatter};

/// Extra attempts allowed within a single generating step.
const STEP_MAX_RETRIES: u32 = 2;

/// Consecutive-error ceiling across a step's attempts.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// One conversation-completion exchange, including tool cycles.
pub(crate) struct Interaction<'a, L: Llm> {
    cx: &'a CallContext,
    llm: &'a L,
    messages: &'a mut Messages,
    body: Vec<u8>,
    mutators: &'a [RequestMutator],
}

enum Step {
    /// The model answered with text; the loop is over.
    Final(String),
    /// Tools ran and their results were injected; generate again.
    ToolsHandled,
}

impl<'a, L: Llm> Interaction<'a, L> {
    pub(crate) fn new(
        cx: &'a CallContext,
        llm: &'a L,
        messages: &'a mut Messages,
        body: Vec<u8>,
        mutators: &'a [RequestMutator],
    ) -> Self {
        Self {
            cx,
            llm,
            messages,
            body,
            mutators,
        }
    }

    /// Runs the loop to completion or abort.
    pub(crate) async fn execute(mut self) -> Result<String, LlmError> {
        if self.body.is_empty() {
            return Err(LlmError::new(
                ErrorKind::InvalidRequest,
                "request body cannot be empty",
            ));
        }

        let max_iterations = self.cx.max_tool_iterations;
        let mut iteration = 0;

        while iteration <= max_iterations {
            match self.step().await? {
                Step::Final(content) => return Ok(content),
                Step::ToolsHandled => iteration += 1,
            }
        }

        Err(LlmError::new(
            ErrorKind::Unknown,
            format!("max tool iterations ({max_iterations}) reached without final result"),
        )
        .with_detail("abort", "max_iterations"))
    }

    /// One generating step, with its own transient-error retry budget.
    async fn step(&mut self) -> Result<Step, LlmError> {
        let mut consecutive_errors = 0u32;

        for attempt in 0..=STEP_MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(retry_interval(attempt, consecutive_errors)).await;
            }

            let response = match self.generate_once().await {
                Ok(r) => r,
                Err(e) => {
                    consecutive_errors += 1;
                    if !should_retry_step(&e, attempt, STEP_MAX_RETRIES, consecutive_errors) {
                        return Err(e);
                    }
                    continue;
                }
            };

            if response.has_tools() {
                self.handle_tools(&response.tools).await?;
                return Ok(Step::ToolsHandled);
            }

            let formatted = self.messages.parse_format(&response.content).map_err(|e| {
                LlmError::new(e.kind, format!("failed to parse response format: {e}"))
            })?;
            return Ok(Step::Final(
                String::from_utf8_lossy(&formatted).into_owned(),
            ));
        }

        Err(LlmError::new(
            ErrorKind::Unknown,
            format!("max retries ({STEP_MAX_RETRIES}) reached"),
        ))
    }

    async fn generate_once(&self) -> Result<ProviderResponse, LlmError> {
        let raw = self.llm.generate(self.cx, &self.body).await?;
        self.llm.parse_response(&raw)
    }

    /// Executes the batch strictly in model order and re-arms the body.
    async fn handle_tools(&mut self, tools: &[ToolCall]) -> Result<(), LlmError> {
        if !self.cx.allow_tools {
            let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
            return Err(LlmError::new(
                ErrorKind::Unknown,
                format!("tools not supported: {}", names.join(", ")),
            )
            .with_detail("abort", "tools_not_supported")
            .with_detail("count", tools.len() as i64));
        }

        let Some(runner) = self.cx.tool_runner.clone() else {
            return Err(LlmError::new(
                ErrorKind::Unknown,
                format!(
                    "tool runner not configured: bind one with CallContext::with_tool_runner \
                     to execute {} tool(s)",
                    tools.len()
                ),
            )
            .with_detail("abort", "tool_runner_missing")
            .with_detail("count", tools.len() as i64));
        };

        let mut records = Vec::with_capacity(tools.len());
        for tool in tools {
            let mut record = ToolResultRecord {
                name: tool.name.clone(),
                args: tool.args.clone(),
                result: String::new(),
                error: None,
            };
            match runner.run(self.cx, &tool.name, &tool.args).await {
                Ok(output) => record.result = output,
                // Captured and forwarded to the model, never fatal.
                Err(e) => record.error = Some(e.to_string()),
            }
            records.push(record);
        }

        let content = match &self.cx.tool_result_formatter {
            Some(formatter) => formatter(&records),
            None => default_tool_result_formatter(&records),
        };
        self.messages.append_user(content);

        self.body = self
            .llm
            .prepare_request(self.messages, self.mutators)
            .map_err(|e| {
                LlmError::new(
                    e.kind,
                    format!("failed to prepare request after tool execution: {e}"),
                )
            })?;
        Ok(())
    }
}

/// Interval before a step's retry, scaled by consecutive errors.
fn retry_interval(attempt: u32, consecutive_errors: u32) -> Duration {
    if consecutive_errors == 0 {
        return Duration::from_millis(100);
    }
    if consecutive_errors <= 3 {
        Duration::from_secs(u64::from(consecutive_errors)).min(Duration::from_secs(5))
    } else {
        (Duration::from_millis(200) * attempt).min(Duration::from_secs(2))
    }
}

/// Whether a failed generating attempt should be retried in place.
fn should_retry_step(
    err: &LlmError,
    attempt: u32,
    max_attempts: u32,
    consecutive_errors: u32,
) -> bool {
    if !err.is_retryable() {
        return false;
    }
    if matches!(
        err.kind,
        ErrorKind::QuotaExceeded | ErrorKind::Unauthorized | ErrorKind::InvalidRequest
    ) {
        return false;
    }
    if consecutive_errors > MAX_CONSECUTIVE_ERRORS {
        return false;
    }
    attempt < max_attempts
}
