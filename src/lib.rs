// Keyguard — Library root
//
// Re-exports the enclave, configuration and CLI modules.

pub mod cli;
pub mod config;
pub mod enclave;
pub mod error;

pub use error::{KeyguardError, Result};
