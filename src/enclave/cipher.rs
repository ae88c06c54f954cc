// Keyguard — Cipher Engine
//
// Turns a validated key into a single-use `CipherHandle` and executes the
// primitive against it. Handle construction is where key-kind mismatches
// surface; execution consumes the handle so it cannot be reused.
//
// Primitives:
//   - AES-256-GCM, 12-byte IV, 16-byte tag appended to the ciphertext
//   - ECDSA P-256 over SHA-256, DER-encoded signatures
//   - HMAC-SHA256

use std::fmt;
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::{EncodePublicKey, LineEnding};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::key::{KeyKind, LoadedKey, OperationKind};
use super::payload::IV_LEN;
use super::EnclaveError;

type HmacSha256 = Hmac<Sha256>;

/// Symmetric key length for AES-256 and HMAC keys.
const SYMMETRIC_KEY_LEN: usize = 32;

// ─── Handle ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleMode {
    Encrypt { iv: [u8; IV_LEN] },
    Decrypt { iv: [u8; IV_LEN] },
    Sign,
    Hmac,
}

/// A cryptographic operation context bound to one key and one call.
pub struct CipherHandle {
    alias: String,
    mode: HandleMode,
    material: Zeroizing<Vec<u8>>,
    auth_required: bool,
    auth_timeout: Option<Duration>,
}

impl CipherHandle {
    fn bind(key: LoadedKey, mode: HandleMode) -> Self {
        let (alias, material, metadata) = key.into_parts();
        Self {
            alias,
            mode,
            material,
            auth_required: metadata.auth_required,
            auth_timeout: metadata.auth_timeout,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn operation(&self) -> OperationKind {
        match self.mode {
            HandleMode::Encrypt { .. } => OperationKind::Encrypt,
            HandleMode::Decrypt { .. } => OperationKind::Decrypt,
            HandleMode::Sign => OperationKind::Sign,
            HandleMode::Hmac => OperationKind::Hmac,
        }
    }

    /// Whether the key was generated with a user-presence requirement.
    pub fn requires_authentication(&self) -> bool {
        self.auth_required
    }

    pub fn auth_timeout(&self) -> Option<Duration> {
        self.auth_timeout
    }

    /// The IV bound to an encrypt or decrypt handle.
    pub fn iv(&self) -> Option<[u8; IV_LEN]> {
        match self.mode {
            HandleMode::Encrypt { iv } | HandleMode::Decrypt { iv } => Some(iv),
            HandleMode::Sign | HandleMode::Hmac => None,
        }
    }
}

impl fmt::Debug for CipherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherHandle")
            .field("alias", &self.alias)
            .field("operation", &self.operation())
            .field("auth_required", &self.auth_required)
            .finish_non_exhaustive()
    }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Builds operation handles from loaded keys and executes primitives.
pub trait CipherEngine: Send + Sync {
    /// Encrypt-mode handle with a freshly generated IV.
    fn build_encrypt_handle(&self, key: LoadedKey) -> Result<CipherHandle, EnclaveError>;

    /// Decrypt-mode handle using the IV carried by the payload.
    fn build_decrypt_handle(
        &self,
        key: LoadedKey,
        iv: [u8; IV_LEN],
    ) -> Result<CipherHandle, EnclaveError>;

    fn build_sign_handle(&self, key: LoadedKey) -> Result<CipherHandle, EnclaveError>;

    fn build_hmac_handle(&self, key: LoadedKey) -> Result<CipherHandle, EnclaveError>;

    /// Run the primitive. The handle is consumed.
    fn execute(&self, handle: CipherHandle, data: &[u8]) -> Result<Vec<u8>, EnclaveError>;
}

// ─── Software Implementation ─────────────────────────────────────────────────

/// Pure-Rust engine over RustCrypto primitives.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareCipherEngine;

impl SoftwareCipherEngine {
    pub fn new() -> Self {
        Self
    }
}

impl CipherEngine for SoftwareCipherEngine {
    fn build_encrypt_handle(&self, key: LoadedKey) -> Result<CipherHandle, EnclaveError> {
        require_cipher_key(&key)?;
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);
        Ok(CipherHandle::bind(key, HandleMode::Encrypt { iv }))
    }

    fn build_decrypt_handle(
        &self,
        key: LoadedKey,
        iv: [u8; IV_LEN],
    ) -> Result<CipherHandle, EnclaveError> {
        require_cipher_key(&key)?;
        Ok(CipherHandle::bind(key, HandleMode::Decrypt { iv }))
    }

    fn build_sign_handle(&self, key: LoadedKey) -> Result<CipherHandle, EnclaveError> {
        if key.metadata().kind != KeyKind::EcdsaP256 {
            return Err(EnclaveError::TypeMismatch(format!(
                "'{}' is a {} key, signing requires an ecdsa-p256 key",
                key.alias(),
                key.metadata().kind
            )));
        }
        signing_key(key.material())?;
        Ok(CipherHandle::bind(key, HandleMode::Sign))
    }

    fn build_hmac_handle(&self, key: LoadedKey) -> Result<CipherHandle, EnclaveError> {
        if key.metadata().kind != KeyKind::HmacSha256 {
            return Err(EnclaveError::TypeMismatch(format!(
                "'{}' is a {} key, HMAC requires an hmac-sha256 key",
                key.alias(),
                key.metadata().kind
            )));
        }
        Ok(CipherHandle::bind(key, HandleMode::Hmac))
    }

    fn execute(&self, handle: CipherHandle, data: &[u8]) -> Result<Vec<u8>, EnclaveError> {
        match handle.mode {
            HandleMode::Encrypt { iv } => aes_cipher(&handle.material)?
                .encrypt(Nonce::from_slice(&iv), data)
                .map_err(|_| EnclaveError::Provider("AES-GCM encryption failed".to_string())),
            HandleMode::Decrypt { iv } => aes_cipher(&handle.material)?
                .decrypt(Nonce::from_slice(&iv), data)
                .map_err(|_| {
                    EnclaveError::Provider(
                        "AES-GCM decryption failed: authentication tag mismatch".to_string(),
                    )
                }),
            HandleMode::Sign => {
                let signature: Signature = signing_key(&handle.material)?
                    .try_sign(data)
                    .map_err(|e| EnclaveError::Provider(format!("ECDSA signing failed: {}", e)))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            HandleMode::Hmac => {
                let mut mac = <HmacSha256 as Mac>::new_from_slice(&handle.material)
                    .map_err(|e| EnclaveError::Provider(format!("invalid HMAC key: {}", e)))?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }
}

// ─── Key Material ────────────────────────────────────────────────────────────

/// Generate fresh key material of the given kind.
pub fn generate_material(kind: KeyKind) -> Zeroizing<Vec<u8>> {
    let mut rng = rand::rng();
    match kind {
        KeyKind::Aes256Gcm | KeyKind::HmacSha256 => {
            let mut material = Zeroizing::new(vec![0u8; SYMMETRIC_KEY_LEN]);
            rng.fill_bytes(&mut material);
            material
        }
        KeyKind::EcdsaP256 => loop {
            // Rejection-sample until the bytes form a valid non-zero scalar below the order.
            let mut candidate = Zeroizing::new(vec![0u8; SYMMETRIC_KEY_LEN]);
            rng.fill_bytes(&mut candidate);
            if SigningKey::from_slice(&candidate).is_ok() {
                break candidate;
            }
        },
    }
}

/// PEM-encoded SubjectPublicKeyInfo for a P-256 private scalar.
pub fn public_key_pem(material: &[u8]) -> Result<String, EnclaveError> {
    signing_key(material)?
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| EnclaveError::Provider(format!("public key export failed: {}", e)))
}

/// Check a DER-encoded ECDSA signature against the key's public half.
pub fn verify_signature(material: &[u8], data: &[u8], der: &[u8]) -> Result<bool, EnclaveError> {
    let Ok(signature) = Signature::from_der(der) else {
        return Ok(false);
    };
    Ok(signing_key(material)?
        .verifying_key()
        .verify(data, &signature)
        .is_ok())
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn require_cipher_key(key: &LoadedKey) -> Result<(), EnclaveError> {
    match key.metadata().kind {
        KeyKind::Aes256Gcm => Ok(()),
        other => Err(EnclaveError::UnsupportedOperation(format!(
            "'{}' is a {} key and cannot encrypt or decrypt",
            key.alias(),
            other
        ))),
    }
}

fn aes_cipher(material: &[u8]) -> Result<Aes256Gcm, EnclaveError> {
    <Aes256Gcm as KeyInit>::new_from_slice(material)
        .map_err(|_| EnclaveError::Provider("stored AES key has invalid length".to_string()))
}

fn signing_key(material: &[u8]) -> Result<SigningKey, EnclaveError> {
    SigningKey::from_slice(material)
        .map_err(|_| EnclaveError::Provider("stored signing key is malformed".to_string()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
