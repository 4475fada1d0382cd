//! Credential scrubbing for log output.
//!
//! Anything that reaches the debug logger goes through [`redact`]
//! first: API-key-looking assignments, bearer tokens, `token=` and
//! `password=` pairs are replaced with `***REDACTED***`. Key-like
//! values shorter than 10 characters (4 for passwords) are left alone
//! to avoid mangling unrelated text.

use std::sync::LazyLock;

use regex::Regex;

static API_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(api[_-]?key["\s]*[:=]["\s]*)[A-Za-z0-9_-]{10,}"#).expect("valid pattern")
});

static BEARER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(authorization["\s]*[:=]["\s]*bearer\s+)[A-Za-z0-9._-]+"#)
        .expect("valid pattern")
});

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(token["\s]*[:=]["\s]*)[A-Za-z0-9._-]{10,}"#).expect("valid pattern")
});

static PASSWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(password["\s]*[:=]["\s]*)[^\s"']{4,}"#).expect("valid pattern")
});

/// Replaces credential values in `input` with `***REDACTED***`.
pub fn redact(input: &str) -> String {
    let out = API_KEY.replace_all(input, "${1}***REDACTED***");
    let out = BEARER.replace_all(&out, "${1}***REDACTED***");
    let out = TOKEN.replace_all(&out, "${1}***REDACTED***");
    let out = PASSWORD.replace_all(&out, "${1}***REDACTED***");
    out.into_owned()
}

/// Logs an outgoing request body at debug level, scrubbed.
///
/// No-op unless [`set_debug(true)`](crate::debug::set_debug) was called.
pub fn log_request_body(body: &[u8]) {
    if crate::debug::is_debug() {
        let text = String::from_utf8_lossy(body);
        tracing::debug!(body = %redact(&text), "request body");
    }
}
