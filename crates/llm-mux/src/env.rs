//! Environment-variable lookup with defaults.

/// Reads `key` from the environment, falling back to `default` when
/// unset or empty.
pub fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_falls_back_when_unset() {
        assert_eq!(env_or("LLM_MUX_DOES_NOT_EXIST", "fallback"), "fallback");
    }

    #[test]
    fn test_reads_set_variable() {
        // SAFETY: test-only mutation of this process's environment.
        unsafe { std::env::set_var("LLM_MUX_ENV_TEST", "value") };
        assert_eq!(env_or("LLM_MUX_ENV_TEST", "fallback"), "value");
        unsafe { std::env::remove_var("LLM_MUX_ENV_TEST") };
    }
}
