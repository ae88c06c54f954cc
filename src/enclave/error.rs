// Keyguard — Enclave error types
//
// Every failure inside an operation maps to exactly one variant here, and
// every variant has a stable code. `OperationFailure` is the shape callers
// see at the orchestrator boundary.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnclaveError {
    #[error("No key stored under alias '{0}'")]
    KeyNotFound(String),

    #[error("Key '{0}' was invalidated by a change in enrolled biometrics")]
    KeyInvalidated(String),

    #[error("Invalid encryption text: {0}")]
    InvalidEncryptionText(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Key type mismatch: {0}")]
    TypeMismatch(String),

    #[error("User authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("User authentication cancelled: {0}")]
    AuthenticationCancelled(String),

    #[error("A key already exists under alias '{0}'")]
    KeyAlreadyExists(String),

    #[error("Underlying provider error: {0}")]
    Provider(String),
}

impl EnclaveError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::KeyNotFound(_) => "KEY_NOT_FOUND",
            Self::KeyInvalidated(_) => "KEY_INVALIDATED",
            Self::InvalidEncryptionText(_) => "INVALID_ENCRYPTION_TEXT",
            Self::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            Self::TypeMismatch(_) => "TYPE_MISMATCH",
            Self::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            Self::AuthenticationCancelled(_) => "AUTHENTICATION_CANCELLED",
            Self::KeyAlreadyExists(_) => "KEY_ALREADY_EXISTS",
            Self::Provider(_) => "UNDERLYING_PROVIDER_ERROR",
        }
    }
}

/// Terminal failure of an orchestrated operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationFailure {
    pub code: &'static str,
    pub message: String,
}

impl From<EnclaveError> for OperationFailure {
    fn from(err: EnclaveError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for OperationFailure {}
