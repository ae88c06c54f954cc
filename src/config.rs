// Keyguard — Runtime configuration
//
// Resolved once at startup from the environment, then overridden by CLI
// flags. Platform capabilities are derived here so nothing downstream
// branches on the platform itself.

use std::time::Duration;

use crate::enclave::{Capabilities, DEFAULT_GATE_TIMEOUT, DEFAULT_SERVICE};
use crate::error::KeyguardError;

pub const ENV_SERVICE: &str = "KEYGUARD_SERVICE";
pub const ENV_ENROLLMENT: &str = "KEYGUARD_ENROLLMENT";
pub const ENV_GATE_TIMEOUT: &str = "KEYGUARD_GATE_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyguardConfig {
    /// Keyring service namespace for all entries.
    pub service: String,
    /// Identifier of the currently enrolled biometric set, when the platform reports one.
    pub enrollment_id: Option<String>,
    /// Prompt timeout for keys that do not set their own.
    pub gate_timeout: Duration,
}

impl Default for KeyguardConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            enrollment_id: None,
            gate_timeout: DEFAULT_GATE_TIMEOUT,
        }
    }
}

impl KeyguardConfig {
    pub fn from_env() -> Result<Self, KeyguardError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, KeyguardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(service) = get(ENV_SERVICE) {
            config.service = service;
        }
        config.enrollment_id = get(ENV_ENROLLMENT);
        if let Some(raw) = get(ENV_GATE_TIMEOUT) {
            config.gate_timeout = parse_timeout(&raw)?;
        }
        Ok(config)
    }

    /// Apply command-line overrides on top of the environment.
    #[must_use]
    pub fn with_overrides(
        mut self,
        service: Option<String>,
        enrollment_id: Option<String>,
        gate_timeout_secs: Option<u64>,
    ) -> Self {
        if let Some(service) = service {
            self.service = service;
        }
        if enrollment_id.is_some() {
            self.enrollment_id = enrollment_id;
        }
        if let Some(secs) = gate_timeout_secs.filter(|s| *s > 0) {
            self.gate_timeout = Duration::from_secs(secs);
        }
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_invalidation_metadata: self.enrollment_id.is_some(),
        }
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, KeyguardError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(KeyguardError::Config(format!(
            "{} must be a positive number of seconds, got '{}'",
            ENV_GATE_TIMEOUT, raw
        ))),
    }
}
