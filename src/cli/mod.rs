// Keyguard — CLI Module
//
// Command-line interface using clap derive macros. Every subcommand goes
// through the keyed-operation orchestrator.

mod commands;

use clap::{Args, Parser, Subcommand};

pub use commands::execute;

/// Keyguard — keyring-backed keys with user-presence gated operations.
#[derive(Parser, Debug)]
#[command(name = "keyguard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Keyring service namespace (overrides KEYGUARD_SERVICE).
    #[arg(long, global = true)]
    pub service: Option<String>,

    /// Identifier of the currently enrolled biometric set (overrides KEYGUARD_ENROLLMENT).
    #[arg(long, global = true)]
    pub enrollment: Option<String>,

    /// Seconds to wait for user confirmation when a key sets no timeout.
    #[arg(long, global = true)]
    pub gate_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by the three key-generation commands.
#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Alias to store the key under.
    #[arg(long)]
    pub alias: String,

    /// Require user confirmation before every use of the key.
    #[arg(long, default_value = "false")]
    pub auth_required: bool,

    /// Seconds a confirmation prompt for this key may stay open (0 = configured default).
    #[arg(long, default_value = "0")]
    pub auth_timeout: u64,

    /// Invalidate the key when the enrolled biometric set changes.
    #[arg(long, default_value = "false")]
    pub invalidate_on_enrollment_change: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an AES-256-GCM encryption key.
    Generate(GenerateArgs),

    /// Generate a P-256 signing key pair and print its PEM public key.
    GeneratePair(GenerateArgs),

    /// Generate an HMAC-SHA256 key.
    GenerateHmac(GenerateArgs),

    /// Encrypt text and print the payload token.
    Encrypt {
        #[arg(long)]
        alias: String,
        /// The text to encrypt.
        plaintext: String,
    },

    /// Decrypt a payload token and print the text.
    Decrypt {
        #[arg(long)]
        alias: String,
        /// A token produced by `keyguard encrypt`.
        payload: String,
    },

    /// Sign data and print the base64 DER signature.
    Sign {
        #[arg(long)]
        alias: String,
        data: String,
    },

    /// Verify a base64 DER signature.
    Verify {
        #[arg(long)]
        alias: String,
        data: String,
        signature: String,
    },

    /// Compute a base64 HMAC-SHA256.
    Hmac {
        #[arg(long)]
        alias: String,
        data: String,
    },

    /// Print the PEM public key of a signing key.
    PublicKey {
        #[arg(long)]
        alias: String,
    },

    /// Remove a key. Succeeds if the alias does not exist.
    Remove {
        #[arg(long)]
        alias: String,
    },

    /// Remove every key in the service namespace.
    RemoveAll,

    /// Report whether an alias exists.
    Exists {
        #[arg(long)]
        alias: String,
    },

    /// List stored keys (metadata only).
    List,
}
