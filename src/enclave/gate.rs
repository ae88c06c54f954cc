// Keyguard — Authentication Gate
//
// The user-presence step between handle construction and execution. A gate
// receives ownership of the handle and either hands it back authenticated or
// fails; on failure the handle is dropped and its key material zeroized.

use std::fmt;
use std::io::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::cipher::CipherHandle;
use super::key::OperationKind;
use super::EnclaveError;

// ─── Prompt Context ──────────────────────────────────────────────────────────

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub alias: String,
    pub operation: OperationKind,
    pub reason: String,
    /// How long the orchestrator waits before treating the prompt as cancelled.
    pub timeout: Duration,
}

impl PromptContext {
    pub fn for_handle(handle: &CipherHandle, timeout: Duration) -> Self {
        let reason = match handle.operation() {
            OperationKind::Encrypt => "encrypt data",
            OperationKind::Decrypt => "decrypt data",
            OperationKind::Sign => "sign data",
            OperationKind::Hmac => "compute a message authentication code",
        };
        Self {
            alias: handle.alias().to_string(),
            operation: handle.operation(),
            reason: format!("Keyguard wants to {} with key '{}'", reason, handle.alias()),
            timeout,
        }
    }
}

impl fmt::Display for PromptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (expires in {:?})", self.reason, self.timeout)
    }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Obtains user authentication for a handle whose key requires it.
#[async_trait]
pub trait AuthenticationGate: Send + Sync {
    /// Wait for the user and release the handle, or report failure/cancellation.
    async fn gate(
        &self,
        handle: CipherHandle,
        context: &PromptContext,
    ) -> Result<CipherHandle, EnclaveError>;
}

// ─── Console Implementation ──────────────────────────────────────────────────

/// Terminal confirmation prompt used by the CLI.
///
/// Prints the prompt context to stderr and reads one line from stdin.
/// `y`/`yes` authenticates, anything else fails, and EOF counts as a
/// cancellation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleGate;

impl ConsoleGate {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuthenticationGate for ConsoleGate {
    async fn gate(
        &self,
        handle: CipherHandle,
        context: &PromptContext,
    ) -> Result<CipherHandle, EnclaveError> {
        {
            let mut stderr = std::io::stderr().lock();
            write!(stderr, "{}. Allow? [y/N] ", context)
                .and_then(|()| stderr.flush())
                .map_err(|e| EnclaveError::Provider(format!("failed to show prompt: {}", e)))?;
        }

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| EnclaveError::Provider(format!("failed to read confirmation: {}", e)))?;

        if read == 0 {
            return Err(EnclaveError::AuthenticationCancelled(
                "input closed before confirmation".to_string(),
            ));
        }

        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => {
                tracing::debug!(
                    alias = %context.alias,
                    op = %context.operation,
                    "User confirmed key use"
                );
                Ok(handle)
            }
            _ => Err(EnclaveError::AuthenticationFailed(
                "user declined the request".to_string(),
            )),
        }
    }
}

// ─── Scripted Mock for Testing ───────────────────────────────────────────────


// ─── Tests ───────────────────────────────────────────────────────────────────
