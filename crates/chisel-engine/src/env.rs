use std::env;

use crate::error::{ChiselError, Result};

/// Process environment access for API keys and endpoint overrides.
pub struct EnvHandler;

impl EnvHandler {
    pub fn get(key: &str) -> Option<String> {
        env::var(key).ok()
    }

    pub fn get_or(key: &str, default: &str) -> String {
        Self::get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn set(key: &str, value: &str) {
        env::set_var(key, value);
    }

    pub fn contains(key: &str) -> bool {
        env::var_os(key).is_some()
    }

    /// Trimmed value, `None` when unset or blank.
    pub fn non_empty(key: &str) -> Option<String> {
        Self::get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn require(key: &str) -> Result<String> {
        Self::non_empty(key).ok_or_else(|| ChiselError::MissingCredential(key.to_string()))
    }
}
