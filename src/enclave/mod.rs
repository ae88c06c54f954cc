// Keyguard — Enclave Module
//
// Keys live in the OS keyring (Keychain/Credential Manager/keyutils) and are
// used through the orchestrator, which checks liveness, drives the
// user-presence gate and wraps ciphertext in a self-describing payload.

mod cipher;
mod error;
mod gate;
mod key;
mod orchestrator;
mod payload;
mod provider;

pub use cipher::{CipherEngine, CipherHandle, SoftwareCipherEngine};
pub use error::{EnclaveError, OperationFailure};
pub use gate::{AuthenticationGate, ConsoleGate, PromptContext};
pub use key::{
    Capabilities, KeyGenConfig, KeyKind, KeyLiveness, KeyMetadata, KeySummary, LoadedKey,
    OperationKind,
};
pub use orchestrator::{KeyedOperationOrchestrator, DEFAULT_GATE_TIMEOUT};
pub use payload::{EncryptedPayload, IV_LEN, TAG_LEN};
pub use provider::{KeyProvider, KeyringProvider, PlatformKeyring, SecretStore, DEFAULT_SERVICE};
