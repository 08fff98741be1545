//! Session configuration with documented constants
//!
//! Every protocol timeout lives here. Values are in server-clock milliseconds.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::core::error::{HoldfastError, Result};

/// Tunables for the authority protocol and spawn selection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a participant stops broadcasting an object it expects to lose
    ///
    /// Should cover a few network round-trips. When it elapses without an
    /// ownership-changed message the participant resumes as owner.
    pub anticipation_window_ms: u64,

    /// Interval after which an unacknowledged release is sent again
    pub release_timeout_ms: u64,

    /// Interval after which an unanswered claim is sent again
    pub claim_timeout_ms: u64,

    /// Resends before an unanswered claim is rolled back to the last confirmed state
    pub max_claim_retries: u32,

    /// Seed for spawn point tie-breaking
    pub spawn_seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            anticipation_window_ms: 300,
            release_timeout_ms: 500,
            claim_timeout_ms: 500,
            max_claim_retries: 3,
            spawn_seed: 0x5eed,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.anticipation_window_ms == 0 {
            return Err(HoldfastError::InvalidConfig(
                "anticipation_window_ms must be positive".into(),
            ));
        }
        if self.release_timeout_ms == 0 || self.claim_timeout_ms == 0 {
            return Err(HoldfastError::InvalidConfig(
                "request timeouts must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = SessionConfig::from_toml_str("anticipation_window_ms = 450\n").unwrap();
        assert_eq!(config.anticipation_window_ms, 450);
        assert_eq!(config.release_timeout_ms, 500);
        assert_eq!(config.max_claim_retries, 3);
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = SessionConfig::from_toml_str("anticipation_window_ms = 0\n");
        assert!(matches!(result, Err(HoldfastError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let result = SessionConfig::from_toml_str("release_timeout_ms = \"soon\"");
        assert!(matches!(result, Err(HoldfastError::Config(_))));
    }
}
