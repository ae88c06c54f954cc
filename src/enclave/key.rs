// Keyguard — Key data model
//
// Types shared by the provider, cipher engine and orchestrator. A
// `LoadedKey` exists for exactly one operation: it is moved into the
// cipher handle that uses it and its material is zeroized on drop.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// The kind of key stored under an alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Symmetric AES-256-GCM encryption key.
    Aes256Gcm,
    /// NIST P-256 signing key pair.
    EcdsaP256,
    /// Symmetric HMAC-SHA256 key.
    HmacSha256,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes256Gcm => write!(f, "aes-256-gcm"),
            Self::EcdsaP256 => write!(f, "ecdsa-p256"),
            Self::HmacSha256 => write!(f, "hmac-sha256"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Encrypt,
    Decrypt,
    Sign,
    Hmac,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encrypt => write!(f, "encrypt"),
            Self::Decrypt => write!(f, "decrypt"),
            Self::Sign => write!(f, "sign"),
            Self::Hmac => write!(f, "hmac"),
        }
    }
}

/// Whether a key's authentication binding still holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLiveness {
    Valid,
    InvalidatedByEnrollmentChange,
}

/// Platform capabilities resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// The platform reports enrollment-change invalidation in key metadata.
    /// When false every key is treated as `KeyLiveness::Valid`.
    pub supports_invalidation_metadata: bool,
}

/// Configuration for key generation.
#[derive(Debug, Clone)]
pub struct KeyGenConfig {
    /// Caller-chosen alias identifying the key.
    pub alias: String,

    /// Require user presence before the key can be used.
    pub auth_required: bool,

    /// How long a user-presence prompt for this key may stay open.
    pub auth_timeout: Option<Duration>,

    /// Bind the key to the current biometric enrollment.
    /// Only honored together with `auth_required`.
    pub invalidate_on_enrollment_change: bool,
}

impl KeyGenConfig {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            auth_required: false,
            auth_timeout: None,
            invalidate_on_enrollment_change: false,
        }
    }

    #[must_use]
    pub fn require_auth(mut self, timeout: Option<Duration>) -> Self {
        self.auth_required = true;
        self.auth_timeout = timeout;
        self
    }

    #[must_use]
    pub fn invalidate_on_enrollment_change(mut self, invalidate: bool) -> Self {
        self.invalidate_on_enrollment_change = invalidate;
        self
    }
}

/// Per-key metadata reported by the provider on every fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMetadata {
    pub kind: KeyKind,
    pub auth_required: bool,
    pub auth_timeout: Option<Duration>,
    pub created_at: DateTime<Utc>,
    invalidated_by_enrollment_change: bool,
}

impl KeyMetadata {
    pub fn new(
        kind: KeyKind,
        auth_required: bool,
        auth_timeout: Option<Duration>,
        created_at: DateTime<Utc>,
        invalidated_by_enrollment_change: bool,
    ) -> Self {
        Self {
            kind,
            auth_required,
            auth_timeout,
            created_at,
            invalidated_by_enrollment_change,
        }
    }

    /// Only meaningful when `Capabilities::supports_invalidation_metadata` is set.
    pub fn is_invalidated_by_enrollment_change(&self) -> bool {
        self.invalidated_by_enrollment_change
    }

    /// Derive liveness at lookup time. Never cached.
    pub fn liveness(&self, caps: Capabilities) -> KeyLiveness {
        if caps.supports_invalidation_metadata && self.invalidated_by_enrollment_change {
            KeyLiveness::InvalidatedByEnrollmentChange
        } else {
            KeyLiveness::Valid
        }
    }
}

/// Alias listing entry. Carries no key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySummary {
    pub alias: String,
    pub kind: KeyKind,
    pub auth_required: bool,
    pub created_at: DateTime<Utc>,
}

/// A key fetched from secure storage for a single operation.
pub struct LoadedKey {
    alias: String,
    material: Zeroizing<Vec<u8>>,
    metadata: KeyMetadata,
}

impl LoadedKey {
    pub fn new(
        alias: impl Into<String>,
        material: Zeroizing<Vec<u8>>,
        metadata: KeyMetadata,
    ) -> Self {
        Self {
            alias: alias.into(),
            material,
            metadata,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn metadata(&self) -> &KeyMetadata {
        &self.metadata
    }

    pub fn material(&self) -> &[u8] {
        &self.material
    }

    /// Consume the key, yielding its material for a cipher handle.
    pub(crate) fn into_parts(self) -> (String, Zeroizing<Vec<u8>>, KeyMetadata) {
        (self.alias, self.material, self.metadata)
    }
}

// Custom Debug that never prints key material.
impl fmt::Debug for LoadedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedKey")
            .field("alias", &self.alias)
            .field("material", &"[REDACTED]")
            .field("metadata", &self.metadata)
            .finish()
    }
}
