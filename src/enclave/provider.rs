// Keyguard — Key Provider
//
// Generates keys and persists them in the platform's native keyring. Each
// alias is one keyring entry holding a JSON record; a reserved index entry
// lists the aliases because platform keyrings cannot enumerate entries.
//
// Flow:
//   1. `generate_*()` — create material, record auth policy and the digest of
//      the current biometric enrollment, store the record and index it
//   2. `fetch()` — load the record and report whether the enrollment it was
//      bound to still matches the platform's current enrollment
//   3. `delete()` / `delete_all()` — remove entries and prune the index

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use super::cipher::{generate_material, public_key_pem};
use super::key::{KeyGenConfig, KeyKind, KeyMetadata, KeySummary, LoadedKey};
use super::EnclaveError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default service name used to namespace Keyguard entries in the platform keyring.
pub const DEFAULT_SERVICE: &str = "keyguard-enclave";

/// Keyring user name of the alias index entry. Not usable as an alias.
const INDEX_USER: &str = "__keyguard_index__";

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over key generation and secure storage, enabling platform
/// backends and in-memory implementations for testing.
pub trait KeyProvider: Send + Sync {
    /// Generate and store an AES-256-GCM key.
    fn generate_key(&self, config: &KeyGenConfig) -> Result<(), EnclaveError>;

    /// Generate and store a P-256 key pair. Returns the PEM public key.
    fn generate_key_pair(&self, config: &KeyGenConfig) -> Result<String, EnclaveError>;

    /// Generate and store an HMAC-SHA256 key.
    fn generate_hmac_key(&self, config: &KeyGenConfig) -> Result<(), EnclaveError>;

    fn exists(&self, alias: &str) -> Result<bool, EnclaveError>;

    /// Load key material and metadata. Fails with `KeyNotFound` for absent aliases.
    fn fetch(&self, alias: &str) -> Result<LoadedKey, EnclaveError>;

    /// Remove a key. Absent aliases are not an error.
    fn delete(&self, alias: &str) -> Result<(), EnclaveError>;

    fn delete_all(&self) -> Result<(), EnclaveError>;

    /// Summaries of every stored key, sorted by alias.
    fn list(&self) -> Result<Vec<KeySummary>, EnclaveError>;
}

// ─── Stored Record ───────────────────────────────────────────────────────────

/// The persisted form of a key. Material is zeroized on drop.
#[derive(Serialize, Deserialize)]
struct StoredKey {
    kind: KeyKind,
    material: String,
    auth_required: bool,
    #[serde(default)]
    auth_timeout_secs: Option<u64>,
    #[serde(default)]
    enrollment_digest: Option<String>,
    created_at: DateTime<Utc>,
}

impl Drop for StoredKey {
    fn drop(&mut self) {
        self.material.zeroize();
    }
}

impl StoredKey {
    /// Create a fresh record. A key that asks to be bound to the biometric
    /// enrollment cannot be created while no enrollment exists.
    fn generate(
        config: &KeyGenConfig,
        kind: KeyKind,
        enrollment: Option<&str>,
    ) -> Result<Self, EnclaveError> {
        let bound_to = if config.auth_required && config.invalidate_on_enrollment_change {
            let current = enrollment.ok_or_else(|| {
                EnclaveError::UnsupportedOperation(format!(
                    "cannot bind '{}' to biometric enrollment: none is enrolled",
                    config.alias
                ))
            })?;
            Some(enrollment_digest(current))
        } else {
            None
        };

        let material = generate_material(kind);
        Ok(Self {
            kind,
            material: STANDARD.encode(material.as_slice()),
            auth_required: config.auth_required,
            auth_timeout_secs: config.auth_timeout.map(|t| t.as_secs()),
            enrollment_digest: bound_to,
            created_at: Utc::now(),
        })
    }

    fn material_bytes(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        STANDARD
            .decode(&self.material)
            .map(Zeroizing::new)
            .map_err(|e| EnclaveError::Provider(format!("stored key material is corrupt: {}", e)))
    }

    /// Build the per-operation view. Invalidation is computed here, every fetch.
    fn load(
        &self,
        alias: &str,
        current_enrollment: Option<&str>,
    ) -> Result<LoadedKey, EnclaveError> {
        let invalidated = match (&self.enrollment_digest, current_enrollment) {
            (Some(bound), Some(current)) => *bound != enrollment_digest(current),
            _ => false,
        };
        let metadata = KeyMetadata::new(
            self.kind,
            self.auth_required,
            self.auth_timeout_secs.map(Duration::from_secs),
            self.created_at,
            invalidated,
        );
        Ok(LoadedKey::new(alias, self.material_bytes()?, metadata))
    }

    fn summary(&self, alias: &str) -> KeySummary {
        KeySummary {
            alias: alias.to_string(),
            kind: self.kind,
            auth_required: self.auth_required,
            created_at: self.created_at,
        }
    }

    fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        serde_json::to_vec(self)
            .map(Zeroizing::new)
            .map_err(|e| EnclaveError::Provider(format!("failed to serialize key record: {}", e)))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EnclaveError> {
        serde_json::from_slice(bytes)
            .map_err(|e| EnclaveError::Provider(format!("failed to parse key record: {}", e)))
    }
}

/// SHA-256 hex digest of an enrollment identifier.
fn enrollment_digest(enrollment: &str) -> String {
    Sha256::digest(enrollment.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn check_alias(alias: &str) -> Result<(), EnclaveError> {
    if alias.trim().is_empty() {
        return Err(EnclaveError::Provider("alias must not be empty".to_string()));
    }
    if alias == INDEX_USER {
        return Err(EnclaveError::Provider(format!("alias '{}' is reserved", alias)));
    }
    Ok(())
}

// ─── Secret Store ────────────────────────────────────────────────────────────

/// Raw byte storage addressed by user name within one service namespace.
pub trait SecretStore: Send + Sync {
    fn read(&self, user: &str) -> Result<Option<Zeroizing<Vec<u8>>>, EnclaveError>;

    fn write(&self, user: &str, secret: &[u8]) -> Result<(), EnclaveError>;

    /// Returns whether an entry was removed.
    fn remove(&self, user: &str) -> Result<bool, EnclaveError>;
}

/// Secret store backed by the `keyring` crate.
/// Dispatches to:
///   - macOS / iOS: Security.framework Keychain
///   - Windows: Windows Credential Manager
///   - Linux: kernel keyutils
#[derive(Debug, Clone)]
pub struct PlatformKeyring {
    service: String,
}

impl PlatformKeyring {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, user: &str) -> Result<keyring::Entry, EnclaveError> {
        keyring::Entry::new(&self.service, user)
            .map_err(|e| EnclaveError::Provider(format!("failed to create keyring entry: {}", e)))
    }
}

impl SecretStore for PlatformKeyring {
    fn read(&self, user: &str) -> Result<Option<Zeroizing<Vec<u8>>>, EnclaveError> {
        match self.entry(user)?.get_secret() {
            Ok(secret) => Ok(Some(Zeroizing::new(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(EnclaveError::Provider(format!(
                "failed to read keyring entry: {}",
                e
            ))),
        }
    }

    fn write(&self, user: &str, secret: &[u8]) -> Result<(), EnclaveError> {
        self.entry(user)?
            .set_secret(secret)
            .map_err(|e| EnclaveError::Provider(format!("failed to write keyring entry: {}", e)))
    }

    fn remove(&self, user: &str) -> Result<bool, EnclaveError> {
        match self.entry(user)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(EnclaveError::Provider(format!(
                "failed to delete keyring entry: {}",
                e
            ))),
        }
    }
}

// ─── Platform Implementation ─────────────────────────────────────────────────

/// Production provider: key records and the alias index kept in a
/// [`SecretStore`], the platform keyring by default.
///
/// Store access is serialized through an internal mutex: the index entry is
/// read-modify-write and the platform stores are not guaranteed reentrant.
pub struct KeyringProvider<S = PlatformKeyring> {
    store: S,
    enrollment: Option<String>,
    lock: Mutex<()>,
}

impl KeyringProvider<PlatformKeyring> {
    pub fn new() -> Self {
        Self::with_service(DEFAULT_SERVICE)
    }

    /// Creates a provider under a custom service namespace (useful for isolation).
    pub fn with_service(service: &str) -> Self {
        Self::with_store(PlatformKeyring::new(service))
    }
}

impl Default for KeyringProvider<PlatformKeyring> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SecretStore> KeyringProvider<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store,
            enrollment: None,
            lock: Mutex::new(()),
        }
    }

    /// Set the identifier of the currently enrolled biometric set.
    #[must_use]
    pub fn with_enrollment(mut self, enrollment: Option<String>) -> Self {
        self.enrollment = enrollment;
        self
    }

    fn acquire(&self) -> Result<MutexGuard<'_, ()>, EnclaveError> {
        self.lock
            .lock()
            .map_err(|_| EnclaveError::Provider("keyring lock poisoned".to_string()))
    }

    fn read_record(&self, alias: &str) -> Result<Option<StoredKey>, EnclaveError> {
        self.store
            .read(alias)?
            .map(|bytes| StoredKey::from_bytes(&bytes))
            .transpose()
    }

    fn read_index(&self) -> Result<BTreeSet<String>, EnclaveError> {
        match self.store.read(INDEX_USER)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| EnclaveError::Provider(format!("alias index is corrupt: {}", e))),
            None => Ok(BTreeSet::new()),
        }
    }

    fn write_index(&self, index: &BTreeSet<String>) -> Result<(), EnclaveError> {
        let bytes = serde_json::to_vec(index).map_err(|e| {
            EnclaveError::Provider(format!("failed to serialize alias index: {}", e))
        })?;
        self.store.write(INDEX_USER, &bytes)
    }

    fn index_alias(&self, alias: &str) -> Result<(), EnclaveError> {
        let mut index = self.read_index()?;
        index.insert(alias.to_string());
        self.write_index(&index)
    }

    /// Generate, persist and index a new key. Caller must hold the lock.
    fn store_new(&self, config: &KeyGenConfig, kind: KeyKind) -> Result<StoredKey, EnclaveError> {
        check_alias(&config.alias)?;
        if self.store.read(&config.alias)?.is_some() {
            return Err(EnclaveError::KeyAlreadyExists(config.alias.clone()));
        }

        let record = StoredKey::generate(config, kind, self.enrollment.as_deref())?;
        self.store.write(&config.alias, &record.to_bytes()?)?;

        // An unindexed record would block the alias and escape delete_all.
        if let Err(e) = self.index_alias(&config.alias) {
            if let Err(cleanup) = self.store.remove(&config.alias) {
                tracing::error!(
                    alias = %config.alias,
                    error = %cleanup,
                    "Failed to remove unindexed key record"
                );
            }
            return Err(e);
        }

        tracing::info!(
            alias = %config.alias,
            kind = %kind,
            auth_required = config.auth_required,
            "Key generated and stored in platform keyring"
        );
        Ok(record)
    }
}

impl<S: SecretStore> KeyProvider for KeyringProvider<S> {
    fn generate_key(&self, config: &KeyGenConfig) -> Result<(), EnclaveError> {
        let _guard = self.acquire()?;
        self.store_new(config, KeyKind::Aes256Gcm).map(|_| ())
    }

    fn generate_key_pair(&self, config: &KeyGenConfig) -> Result<String, EnclaveError> {
        let _guard = self.acquire()?;
        let record = self.store_new(config, KeyKind::EcdsaP256)?;
        public_key_pem(&record.material_bytes()?)
    }

    fn generate_hmac_key(&self, config: &KeyGenConfig) -> Result<(), EnclaveError> {
        let _guard = self.acquire()?;
        self.store_new(config, KeyKind::HmacSha256).map(|_| ())
    }

    fn exists(&self, alias: &str) -> Result<bool, EnclaveError> {
        if check_alias(alias).is_err() {
            return Ok(false);
        }
        let _guard = self.acquire()?;
        Ok(self.store.read(alias)?.is_some())
    }

    fn fetch(&self, alias: &str) -> Result<LoadedKey, EnclaveError> {
        check_alias(alias).map_err(|_| EnclaveError::KeyNotFound(alias.to_string()))?;
        let _guard = self.acquire()?;
        let record = self
            .read_record(alias)?
            .ok_or_else(|| EnclaveError::KeyNotFound(alias.to_string()))?;
        record.load(alias, self.enrollment.as_deref())
    }

    fn delete(&self, alias: &str) -> Result<(), EnclaveError> {
        if check_alias(alias).is_err() {
            return Ok(());
        }
        let _guard = self.acquire()?;
        if self.store.remove(alias)? {
            tracing::info!(alias = %alias, "Key deleted from platform keyring");
        } else {
            tracing::debug!(alias = %alias, "No key to delete");
        }

        let mut index = self.read_index()?;
        if index.remove(alias) {
            self.write_index(&index)?;
        }
        Ok(())
    }

    fn delete_all(&self) -> Result<(), EnclaveError> {
        let _guard = self.acquire()?;
        let index = self.read_index()?;
        for alias in &index {
            self.store.remove(alias)?;
        }
        self.store.remove(INDEX_USER)?;
        tracing::warn!(count = index.len(), "All keys deleted from platform keyring");
        Ok(())
    }

    fn list(&self) -> Result<Vec<KeySummary>, EnclaveError> {
        let _guard = self.acquire()?;
        let mut summaries = Vec::new();
        for alias in self.read_index()? {
            // Entries removed outside Keyguard are skipped.
            if let Some(record) = self.read_record(&alias)? {
                summaries.push(record.summary(&alias));
            }
        }
        Ok(summaries)
    }
}

// ─── In-Memory Mock for Testing ──────────────────────────────────────────────


// ─── Tests ───────────────────────────────────────────────────────────────────
