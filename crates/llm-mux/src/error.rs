//! Unified error type for all provider operations.
//!
//! Every adapter maps its native failures into [`LlmError`], giving
//! callers a single type to match against regardless of which backend
//! is in use. The [`ErrorKind`] set is closed: HTTP statuses, transport
//! failures, and parse failures all collapse into one of these kinds,
//! and retry decisions are made purely from the kind.
//!
//! # Retryability
//!
//! ```rust
//! use llm_mux::{ErrorKind, LlmError};
//!
//! assert!(LlmError::new(ErrorKind::RateLimited, "slow down").is_retryable());
//! assert!(!LlmError::new(ErrorKind::Unauthorized, "bad key").is_retryable());
//! ```

use std::collections::HashMap;

use http::StatusCode;
use serde_json::Value;

/// Classification of a failed LLM operation.
///
/// The set is closed — adapters must not invent new kinds. Retryability
/// is a property of the kind alone, see [`ErrorKind::is_retryable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unclassified failure.
    Unknown,
    /// HTTP 401, or a missing API key where one is required.
    Unauthorized,
    /// HTTP 429 without a quota indication. Backing off helps.
    RateLimited,
    /// HTTP 429 whose message mentions a quota. Backing off does not help.
    QuotaExceeded,
    /// A 4xx status not otherwise classified.
    BadRequest,
    /// HTTP 400 without a more specific classification.
    InvalidRequest,
    /// HTTP 400 whose message mentions tokens or length.
    TokenLimit,
    /// HTTP 404 whose message mentions a model.
    ModelNotFound,
    /// HTTP 5xx.
    Server,
    /// A request or stream deadline expired.
    Timeout,
    /// A transport-level failure (connect, reset, DNS).
    ProviderUnavailable,
    /// The caller cancelled the operation.
    ContextCanceled,
    /// The response payload did not match the provider's documented shape.
    InvalidResponse,
    /// The declared output format was missing from the response.
    OutputFormatNotFound,
}

impl ErrorKind {
    /// Whether a request failing with this kind may succeed if retried.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Server | Self::Timeout | Self::ProviderUnavailable
        )
    }

    /// Classify an HTTP status together with the response body.
    ///
    /// The body is matched case-insensitively: a 429 mentioning `quota`
    /// is a terminal [`QuotaExceeded`](Self::QuotaExceeded), a 404
    /// mentioning `model` is [`ModelNotFound`](Self::ModelNotFound), and
    /// a 400 mentioning `token` or `length` is
    /// [`TokenLimit`](Self::TokenLimit).
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let lower = body.to_lowercase();
        match status.as_u16() {
            401 => Self::Unauthorized,
            429 if lower.contains("quota") => Self::QuotaExceeded,
            429 => Self::RateLimited,
            404 if lower.contains("model") => Self::ModelNotFound,
            404 => Self::BadRequest,
            400 if lower.contains("token") || lower.contains("length") => Self::TokenLimit,
            400 => Self::InvalidRequest,
            s if s >= 500 => Self::Server,
            s if s >= 400 => Self::BadRequest,
            _ => Self::Unknown,
        }
    }
}

/// The error type returned by every operation in this crate.
///
/// Carries a closed [`ErrorKind`], a human-readable message, and an
/// optional bag of structured details for diagnostics. Messages never
/// contain raw credentials — anything that passes through the debug
/// logger is scrubbed by [`redact`](crate::redact::redact) first.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct LlmError {
    /// Classification of the failure.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Structured context (provider name, HTTP status, abort reason, …).
    pub details: HashMap<String, Value>,
}

impl LlmError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Attaches a structured detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Whether the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Builds an error from an HTTP status and response body.
    ///
    /// The message is taken from the body's `error.message` field when
    /// the body is JSON, from the raw body otherwise, or synthesized
    /// from the status code when the body is empty.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("status code: {}", status.as_u16())
                } else {
                    body.to_owned()
                }
            });
        Self::new(ErrorKind::from_status(status, body), message)
            .with_detail("status", i64::from(status.as_u16()))
    }

    /// Shorthand for a caller-cancellation error.
    pub fn canceled() -> Self {
        Self::new(ErrorKind::ContextCanceled, "operation cancelled by caller")
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::InvalidResponse, err.to_string())
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::ProviderUnavailable
        };
        Self::new(kind, err.to_string())
    }
}
