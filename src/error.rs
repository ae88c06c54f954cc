// Keyguard — Top-level error types
//
// Aggregates enclave failures, configuration problems and I/O into a single
// error enum for the application boundary.

use thiserror::Error;

use crate::enclave::{EnclaveError, OperationFailure};

/// Top-level error type for all Keyguard operations.
#[derive(Debug, Error)]
pub enum KeyguardError {
    #[error("{0}")]
    Operation(#[from] OperationFailure),

    #[error("Enclave error: {0}")]
    Enclave(#[from] EnclaveError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl KeyguardError {
    /// Stable code for reporting, matching the enclave's failure codes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Operation(failure) => failure.code,
            Self::Enclave(err) => err.code(),
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Other(_) => "ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, KeyguardError>;
