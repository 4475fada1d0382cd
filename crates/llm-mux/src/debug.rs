//! Process-global debug switch.
//!
//! When enabled, adapters log outgoing request bodies and incoming
//! responses at `debug` level (credentials scrubbed first, see
//! [`redact`](crate::redact)). The flag is a single atomic bool so
//! flipping it is safe from any thread at any time.

use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Enables or disables debug logging of request/response bodies.
pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::Relaxed);
}

/// Whether debug logging is currently enabled.
pub fn is_debug() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle() {
        set_debug(true);
        assert!(is_debug());
        set_debug(false);
        assert!(!is_debug());
    }
}
