//! Process-wide HTTP transport.
//!
//! One pooled [`reqwest::Client`] serves every adapter; host
//! applications may swap it via [`set_client`]. Two operations cover
//! all traffic: a JSON POST and a streaming POST whose body is consumed
//! incrementally by the stream engine.
//!
//! Transport-level failures (connect, reset, DNS) classify as
//! [`ProviderUnavailable`](ErrorKind::ProviderUnavailable) and are
//! retryable; request-deadline expiry classifies as
//! [`Timeout`](ErrorKind::Timeout).

use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use http::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

use crate::context::CallContext;
use crate::error::{ErrorKind, LlmError};

static CLIENT: LazyLock<RwLock<reqwest::Client>> = LazyLock::new(|| RwLock::new(default_client()));

fn default_client() -> reqwest::Client {
    // reqwest exposes no process-global idle-connection cap and no
    // TLS-handshake sub-timeout; the connect timeout and the
    // per-request deadline bound slow handshakes instead.
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(10)
        .build()
        .expect("default HTTP client must build")
}

/// Replaces the process-wide HTTP client.
///
/// Calls already in flight keep the client they started with.
pub fn set_client(client: reqwest::Client) {
    *CLIENT.write().expect("client lock poisoned") = client;
}

/// A handle to the process-wide HTTP client (cheap clone).
pub fn client() -> reqwest::Client {
    CLIENT.read().expect("client lock poisoned").clone()
}

/// A completed (non-streaming) HTTP exchange.
#[derive(Debug)]
pub struct PostResponse {
    /// The HTTP status.
    pub status: StatusCode,
    /// The raw response body.
    pub body: String,
}

impl PostResponse {
    /// Parses the body as JSON.
    pub fn json(&self) -> Result<Value, LlmError> {
        serde_json::from_str(&self.body).map_err(|e| {
            LlmError::new(
                ErrorKind::InvalidResponse,
                format!("response body is not valid JSON: {e}"),
            )
        })
    }
}

/// POSTs a JSON body and reads the full response.
///
/// Honors `cx` cancellation at every suspension; `timeout` bounds this
/// single attempt.
pub async fn post_json(
    cx: &CallContext,
    url: &str,
    headers: HeaderMap,
    body: &[u8],
    timeout: Duration,
) -> Result<PostResponse, LlmError> {
    if cx.is_cancelled() {
        return Err(LlmError::canceled());
    }

    let request = client()
        .post(url)
        .headers(headers)
        .header("content-type", HeaderValue::from_static("application/json"))
        .timeout(timeout)
        .body(body.to_vec())
        .send();

    let response = tokio::select! {
        () = cx.cancel_token().cancelled() => return Err(LlmError::canceled()),
        resp = request => resp.map_err(LlmError::from)?,
    };

    let status = response.status();
    let body = tokio::select! {
        () = cx.cancel_token().cancelled() => return Err(LlmError::canceled()),
        text = response.text() => text.map_err(LlmError::from)?,
    };

    Ok(PostResponse { status, body })
}

/// POSTs a body and hands back the response for incremental reading.
///
/// Non-2xx statuses are read to completion and classified here, so the
/// caller only ever streams a successful response.
pub async fn open_stream(
    cx: &CallContext,
    url: &str,
    headers: HeaderMap,
    body: &[u8],
) -> Result<reqwest::Response, LlmError> {
    if cx.is_cancelled() {
        return Err(LlmError::canceled());
    }

    let request = client()
        .post(url)
        .headers(headers)
        .header("content-type", HeaderValue::from_static("application/json"))
        .header("accept", HeaderValue::from_static("text/event-stream"))
        .body(body.to_vec())
        .send();

    let response = tokio::select! {
        () = cx.cancel_token().cancelled() => return Err(LlmError::canceled()),
        resp = request => resp.map_err(LlmError::from)?,
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::from_status(status, &body));
    }

    Ok(response)
}

/// Adapts a streaming response into the byte stream the engine drives.
pub fn byte_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<Bytes, LlmError>> + Send {
    response.bytes_stream().map_err(|e| {
        LlmError::new(
            ErrorKind::ProviderUnavailable,
            format!("stream read error: {e}"),
        )
    })
}
