// Keyguard — Keyed Operation Orchestrator
//
// The single path from "alias + request" to an outcome:
//
//   validate payload (decrypt only) → fetch key → liveness check
//     → build handle → gate (auth-bound keys only) → execute → encode
//
// The gate is the only suspension point. Every collaborator error is
// converted to an `OperationFailure` before it leaves this module, and each
// call yields exactly one outcome. No handle or key outlives its call.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use uuid::Uuid;

use super::cipher::{self, CipherEngine, CipherHandle};
use super::gate::{AuthenticationGate, PromptContext};
use super::key::{
    Capabilities, KeyGenConfig, KeyKind, KeyLiveness, KeySummary, LoadedKey, OperationKind,
};
use super::payload::EncryptedPayload;
use super::provider::KeyProvider;
use super::{EnclaveError, OperationFailure};

/// Upper bound on a user-presence prompt when the key sets no timeout.
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct KeyedOperationOrchestrator<P, C, G> {
    provider: P,
    engine: C,
    gate: G,
    capabilities: Capabilities,
    gate_timeout: Duration,
}

impl<P, C, G> KeyedOperationOrchestrator<P, C, G>
where
    P: KeyProvider,
    C: CipherEngine,
    G: AuthenticationGate,
{
    pub fn new(provider: P, engine: C, gate: G, capabilities: Capabilities) -> Self {
        Self {
            provider,
            engine,
            gate,
            capabilities,
            gate_timeout: DEFAULT_GATE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout = timeout;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    // ─── Gated Operations ────────────────────────────────────────────────────

    /// Encrypt UTF-8 text, returning an encrypted payload token.
    pub async fn encrypt(&self, alias: &str, plaintext: &str) -> Result<String, OperationFailure> {
        let op_id = begin(alias, OperationKind::Encrypt);
        let outcome = self.run_encrypt(alias, plaintext.as_bytes()).await;
        finish(op_id, alias, OperationKind::Encrypt, outcome)
    }

    /// Decrypt a payload token produced by [`Self::encrypt`].
    pub async fn decrypt(&self, alias: &str, payload: &str) -> Result<String, OperationFailure> {
        let op_id = begin(alias, OperationKind::Decrypt);
        let outcome = self.run_decrypt(alias, payload).await;
        finish(op_id, alias, OperationKind::Decrypt, outcome)
    }

    /// Sign data with a P-256 key. Returns a base64 DER signature.
    pub async fn sign(&self, alias: &str, data: &[u8]) -> Result<String, OperationFailure> {
        let op_id = begin(alias, OperationKind::Sign);
        let outcome = self.run_sign(alias, data).await;
        finish(op_id, alias, OperationKind::Sign, outcome)
    }

    // ─── Ungated Operations ──────────────────────────────────────────────────

    /// HMAC-SHA256 over data, returned as base64.
    ///
    /// Never consults the authentication gate, even for keys generated with
    /// `auth_required`, and completes synchronously.
    pub fn hmac(&self, alias: &str, data: &[u8]) -> Result<String, OperationFailure> {
        let op_id = begin(alias, OperationKind::Hmac);
        let outcome = self.validate_and_fetch(alias).and_then(|key| {
            let handle = self.engine.build_hmac_handle(key)?;
            let mac = self.engine.execute(handle, data)?;
            Ok(STANDARD.encode(mac))
        });
        finish(op_id, alias, OperationKind::Hmac, outcome)
    }

    /// Check a base64 DER signature against a stored signing key.
    pub fn verify(
        &self,
        alias: &str,
        data: &[u8],
        signature: &str,
    ) -> Result<bool, OperationFailure> {
        let outcome = self.fetch_signing_key(alias).and_then(|key| {
            let Ok(der) = STANDARD.decode(signature.trim()) else {
                return Ok(false);
            };
            cipher::verify_signature(key.material(), data, &der)
        });
        outcome.map_err(OperationFailure::from)
    }

    /// PEM SubjectPublicKeyInfo of an existing signing key.
    pub fn public_key_pem(&self, alias: &str) -> Result<String, OperationFailure> {
        self.fetch_signing_key(alias)
            .and_then(|key| cipher::public_key_pem(key.material()))
            .map_err(OperationFailure::from)
    }

    // ─── Key Management ──────────────────────────────────────────────────────

    pub fn generate_key(&self, config: &KeyGenConfig) -> Result<(), OperationFailure> {
        self.provider.generate_key(config).map_err(OperationFailure::from)
    }

    /// Generate a signing key pair and return its PEM public key.
    pub fn generate_key_pair(&self, config: &KeyGenConfig) -> Result<String, OperationFailure> {
        self.provider
            .generate_key_pair(config)
            .map_err(OperationFailure::from)
    }

    pub fn generate_hmac_key(&self, config: &KeyGenConfig) -> Result<(), OperationFailure> {
        self.provider
            .generate_hmac_key(config)
            .map_err(OperationFailure::from)
    }

    /// Remove a key. Removing an absent alias succeeds.
    pub fn remove_key(&self, alias: &str) -> Result<(), OperationFailure> {
        self.provider.delete(alias).map_err(OperationFailure::from)
    }

    pub fn remove_all_keys(&self) -> Result<(), OperationFailure> {
        self.provider.delete_all().map_err(OperationFailure::from)
    }

    pub fn has_alias(&self, alias: &str) -> Result<bool, OperationFailure> {
        self.provider.exists(alias).map_err(OperationFailure::from)
    }

    pub fn list_keys(&self) -> Result<Vec<KeySummary>, OperationFailure> {
        self.provider.list().map_err(OperationFailure::from)
    }

    // ─── Pipeline ────────────────────────────────────────────────────────────

    /// Fetch a key and reject it if its enrollment binding is broken.
    /// Runs before any handle is built.
    fn validate_and_fetch(&self, alias: &str) -> Result<LoadedKey, EnclaveError> {
        let key = self.provider.fetch(alias)?;
        match key.metadata().liveness(self.capabilities) {
            KeyLiveness::Valid => Ok(key),
            KeyLiveness::InvalidatedByEnrollmentChange => {
                tracing::warn!(alias = %alias, "Key invalidated by biometric enrollment change");
                Err(EnclaveError::KeyInvalidated(alias.to_string()))
            }
        }
    }

    fn fetch_signing_key(&self, alias: &str) -> Result<LoadedKey, EnclaveError> {
        let key = self.provider.fetch(alias)?;
        if key.metadata().kind != KeyKind::EcdsaP256 {
            return Err(EnclaveError::TypeMismatch(format!(
                "'{}' is a {} key, not a signing key",
                alias,
                key.metadata().kind
            )));
        }
        Ok(key)
    }

    /// Pass the handle through the gate when its key demands user presence.
    /// Keys without that requirement pass straight through.
    async fn authorize(&self, handle: CipherHandle) -> Result<CipherHandle, EnclaveError> {
        if !handle.requires_authentication() {
            return Ok(handle);
        }

        let limit = handle.auth_timeout().unwrap_or(self.gate_timeout);
        let context = PromptContext::for_handle(&handle, limit);
        tracing::debug!(
            alias = %context.alias,
            timeout_ms = limit.as_millis() as u64,
            "Awaiting user authentication"
        );

        // On timeout the gate future is dropped together with the handle it owns.
        match tokio::time::timeout(limit, self.gate.gate(handle, &context)).await {
            Ok(result) => result,
            Err(_) => Err(EnclaveError::AuthenticationCancelled(format!(
                "no authentication for '{}' within {:?}",
                context.alias, limit
            ))),
        }
    }

    async fn run_encrypt(&self, alias: &str, plaintext: &[u8]) -> Result<String, EnclaveError> {
        let key = self.validate_and_fetch(alias)?;
        let handle = self.engine.build_encrypt_handle(key)?;
        let iv = handle
            .iv()
            .ok_or_else(|| EnclaveError::Provider("encrypt handle carries no IV".to_string()))?;

        let handle = self.authorize(handle).await?;
        let ciphertext = self.engine.execute(handle, plaintext)?;
        Ok(EncryptedPayload::new(iv, ciphertext)?.encode())
    }

    async fn run_decrypt(&self, alias: &str, text: &str) -> Result<String, EnclaveError> {
        // Rejected before the key is touched so bad input never costs a prompt.
        let payload = EncryptedPayload::decode(text)?;

        let key = self.validate_and_fetch(alias)?;
        let handle = self.engine.build_decrypt_handle(key, *payload.iv())?;
        let handle = self.authorize(handle).await?;
        let plaintext = self.engine.execute(handle, payload.ciphertext())?;

        String::from_utf8(plaintext)
            .map_err(|_| EnclaveError::Provider("decrypted data is not valid UTF-8".to_string()))
    }

    async fn run_sign(&self, alias: &str, data: &[u8]) -> Result<String, EnclaveError> {
        let key = self.validate_and_fetch(alias)?;
        let handle = self.engine.build_sign_handle(key)?;
        let handle = self.authorize(handle).await?;
        let signature = self.engine.execute(handle, data)?;
        Ok(STANDARD.encode(signature))
    }
}

// ─── Outcome Logging ─────────────────────────────────────────────────────────

fn begin(alias: &str, op: OperationKind) -> Uuid {
    let op_id = Uuid::new_v4();
    tracing::debug!(op_id = %op_id, alias = %alias, op = %op, "Operation started");
    op_id
}

/// Log the terminal outcome and map it to the caller-facing contract.
fn finish<T>(
    op_id: Uuid,
    alias: &str,
    op: OperationKind,
    outcome: Result<T, EnclaveError>,
) -> Result<T, OperationFailure> {
    match &outcome {
        Ok(_) => tracing::info!(op_id = %op_id, alias = %alias, op = %op, "Operation completed"),
        Err(e) => tracing::warn!(
            op_id = %op_id,
            alias = %alias,
            op = %op,
            code = e.code(),
            "Operation failed: {}",
            e
        ),
    }
    outcome.map_err(OperationFailure::from)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use crate::enclave::cipher::SoftwareCipherEngine;
    use crate::enclave::gate::mock::{Outcome, ScriptedGate};
    use crate::enclave::payload::{IV_LEN, TAG_LEN};
    use crate::enclave::provider::mock::MemoryKeyProvider;
    use p256::pkcs8::DecodePublicKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Software engine that counts handle constructions.
    #[derive(Clone, Default)]
    struct CountingEngine {
        inner: SoftwareCipherEngine,
        builds: Arc<AtomicUsize>,
    }

    impl CountingEngine {
        fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }

        fn count(&self) {
            self.builds.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CipherEngine for CountingEngine {
        fn build_encrypt_handle(&self, key: LoadedKey) -> Result<CipherHandle, EnclaveError> {
            self.count();
            self.inner.build_encrypt_handle(key)
        }

        fn build_decrypt_handle(
            &self,
            key: LoadedKey,
            iv: [u8; IV_LEN],
        ) -> Result<CipherHandle, EnclaveError> {
            self.count();
            self.inner.build_decrypt_handle(key, iv)
        }

        fn build_sign_handle(&self, key: LoadedKey) -> Result<CipherHandle, EnclaveError> {
            self.count();
            self.inner.build_sign_handle(key)
        }

        fn build_hmac_handle(&self, key: LoadedKey) -> Result<CipherHandle, EnclaveError> {
            self.count();
            self.inner.build_hmac_handle(key)
        }

        fn execute(&self, handle: CipherHandle, data: &[u8]) -> Result<Vec<u8>, EnclaveError> {
            self.inner.execute(handle, data)
        }
    }

    type TestOrchestrator =
        KeyedOperationOrchestrator<MemoryKeyProvider, CountingEngine, ScriptedGate>;

    const INVALIDATION: Capabilities = Capabilities {
        supports_invalidation_metadata: true,
    };

    fn setup(gate: &ScriptedGate, engine: &CountingEngine) -> TestOrchestrator {
        KeyedOperationOrchestrator::new(
            MemoryKeyProvider::with_enrollment("enrollment-1"),
            engine.clone(),
            gate.clone(),
            INVALIDATION,
        )
    }

    fn well_formed_token() -> String {
        EncryptedPayload::new([0u8; IV_LEN], vec![0u8; TAG_LEN])
            .unwrap()
            .encode()
    }

    fn gated(alias: &str) -> KeyGenConfig {
        KeyGenConfig::new(alias).require_auth(None)
    }

    fn bound(alias: &str) -> KeyGenConfig {
        gated(alias).invalidate_on_enrollment_change(true)
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_round_trip_without_auth() {
        let gate = ScriptedGate::approving();
        let orch = setup(&gate, &CountingEngine::default());
        orch.generate_key(&KeyGenConfig::new("notes")).unwrap();

        let token = orch.encrypt("notes", "hello").await.unwrap();
        assert!(EncryptedPayload::validate(&token));
        assert_eq!(orch.decrypt("notes", &token).await.unwrap(), "hello");
        assert_eq!(gate.calls(), 0, "Keys without auth pass the gate without prompting");
    }

    #[tokio::test]
    async fn test_auth_bound_key_prompts_once_per_operation() {
        let gate = ScriptedGate::approving();
        let orch = setup(&gate, &CountingEngine::default());
        orch.generate_key(&gated("diary")).unwrap();

        let token = orch.encrypt("diary", "dear diary").await.unwrap();
        assert_eq!(gate.calls(), 1);
        let context = gate.last_context().unwrap();
        assert_eq!(context.alias, "diary");
        assert_eq!(context.operation, OperationKind::Encrypt);
        assert_eq!(context.timeout, DEFAULT_GATE_TIMEOUT);
        assert_eq!(orch.decrypt("diary", &token).await.unwrap(), "dear diary");
        assert_eq!(gate.calls(), 2);
    }

    #[tokio::test]
    async fn test_decrypt_rejects_malformed_payload_before_prompting() {
        let gate = ScriptedGate::approving();
        let engine = CountingEngine::default();
        let orch = setup(&gate, &engine);
        orch.generate_key(&gated("diary")).unwrap();

        for bad in ["", "garbage", "v1.abc", "v1.a.b.c"] {
            let failure = orch.decrypt("diary", bad).await.unwrap_err();
            assert_eq!(failure.code, "INVALID_ENCRYPTION_TEXT", "input: {:?}", bad);
        }
        assert_eq!(gate.calls(), 0);
        assert_eq!(engine.builds(), 0);
        assert_eq!(orch.provider().fetches(), 0, "Malformed input must not touch the key");
    }

    #[tokio::test]
    async fn test_missing_alias_is_key_not_found_for_every_operation() {
        let gate = ScriptedGate::approving();
        let orch = setup(&gate, &CountingEngine::default());

        let encrypt = orch.encrypt("missing", "x").await.unwrap_err();
        let decrypt = orch.decrypt("missing", &well_formed_token()).await.unwrap_err();
        let sign = orch.sign("missing", b"x").await.unwrap_err();
        let hmac = orch.hmac("missing", b"x").unwrap_err();

        for failure in [encrypt, decrypt, sign, hmac] {
            assert_eq!(failure.code, "KEY_NOT_FOUND");
        }
        assert_eq!(gate.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalidated_key_fails_before_any_handle_is_built() {
        let gate = ScriptedGate::approving();
        let engine = CountingEngine::default();
        let orch = setup(&gate, &engine);
        orch.generate_key(&bound("vault")).unwrap();
        orch.generate_key_pair(&bound("signer")).unwrap();
        let token = orch.encrypt("vault", "before").await.unwrap();
        let builds_before = engine.builds();
        let prompts_before = gate.calls();

        orch.provider().set_enrollment(Some("enrollment-2"));

        let encrypt = orch.encrypt("vault", "after").await.unwrap_err();
        let decrypt = orch.decrypt("vault", &token).await.unwrap_err();
        let sign = orch.sign("signer", b"data").await.unwrap_err();
        for failure in [encrypt, decrypt, sign] {
            assert_eq!(failure.code, "KEY_INVALIDATED");
        }
        assert_eq!(engine.builds(), builds_before);
        assert_eq!(gate.calls(), prompts_before);
    }

    #[tokio::test]
    async fn test_invalidation_ignored_without_platform_support() {
        let gate = ScriptedGate::approving();
        let orch = KeyedOperationOrchestrator::new(
            MemoryKeyProvider::with_enrollment("enrollment-1"),
            SoftwareCipherEngine::new(),
            gate.clone(),
            Capabilities::default(),
        );
        orch.generate_key(&bound("vault")).unwrap();
        orch.provider().set_enrollment(Some("enrollment-2"));

        let token = orch.encrypt("vault", "still usable").await.unwrap();
        assert_eq!(orch.decrypt("vault", &token).await.unwrap(), "still usable");
    }

    #[tokio::test]
    async fn test_hmac_never_invokes_gate() {
        let gate = ScriptedGate::new(Outcome::Deny);
        let orch = setup(&gate, &CountingEngine::default());
        orch.generate_hmac_key(&gated("mac")).unwrap();

        let first = orch.hmac("mac", b"message").unwrap();
        let second = orch.hmac("mac", b"message").unwrap();
        assert_eq!(first, second);
        assert_eq!(STANDARD.decode(&first).unwrap().len(), 32);
        assert_eq!(gate.calls(), 0);
    }

    #[tokio::test]
    async fn test_hmac_with_wrong_key_kind_is_type_mismatch() {
        let gate = ScriptedGate::approving();
        let orch = setup(&gate, &CountingEngine::default());
        orch.generate_key(&KeyGenConfig::new("aes")).unwrap();

        assert_eq!(orch.hmac("aes", b"m").unwrap_err().code, "TYPE_MISMATCH");
    }

    #[test]
    fn test_remove_absent_alias_is_not_an_error() {
        let gate = ScriptedGate::approving();
        let orch = setup(&gate, &CountingEngine::default());

        assert!(orch.remove_key("never-created").is_ok());
        assert!(!orch.has_alias("never-created").unwrap());
    }

    #[test]
    fn test_remove_key_and_remove_all() {
        let gate = ScriptedGate::approving();
        let orch = setup(&gate, &CountingEngine::default());
        orch.generate_key(&KeyGenConfig::new("a")).unwrap();
        orch.generate_hmac_key(&KeyGenConfig::new("b")).unwrap();
        assert!(orch.has_alias("a").unwrap());

        orch.remove_key("a").unwrap();
        assert!(!orch.has_alias("a").unwrap());
        assert_eq!(orch.list_keys().unwrap().len(), 1);

        orch.remove_all_keys().unwrap();
        assert!(orch.list_keys().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_key_pair_pem_and_signature_verify() {
        let gate = ScriptedGate::approving();
        let orch = setup(&gate, &CountingEngine::default());
        let pem = orch.generate_key_pair(&gated("signer")).unwrap();

        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(p256::PublicKey::from_public_key_pem(&pem).is_ok());
        assert_eq!(orch.public_key_pem("signer").unwrap(), pem);

        let signature = orch.sign("signer", b"contract").await.unwrap();
        assert_eq!(gate.calls(), 1);
        assert!(orch.verify("signer", b"contract", &signature).unwrap());
        assert!(!orch.verify("signer", b"forged", &signature).unwrap());
        assert!(!orch.verify("signer", b"contract", "%%%").unwrap());
    }

    #[tokio::test]
    async fn test_sign_with_symmetric_key_is_type_mismatch() {
        let gate = ScriptedGate::approving();
        let orch = setup(&gate, &CountingEngine::default());
        orch.generate_key(&gated("aes")).unwrap();

        let failure = orch.sign("aes", b"data").await.unwrap_err();
        assert_eq!(failure.code, "TYPE_MISMATCH");
        assert_eq!(gate.calls(), 0);
        assert_eq!(orch.public_key_pem("aes").unwrap_err().code, "TYPE_MISMATCH");
    }

    #[tokio::test]
    async fn test_encrypt_with_signing_key_is_unsupported() {
        let gate = ScriptedGate::approving();
        let orch = setup(&gate, &CountingEngine::default());
        orch.generate_key_pair(&KeyGenConfig::new("signer")).unwrap();

        let failure = orch.encrypt("signer", "nope").await.unwrap_err();
        assert_eq!(failure.code, "UNSUPPORTED_OPERATION");
    }

    #[tokio::test]
    async fn test_gate_denial_and_cancellation_are_reported() {
        for (outcome, code) in [
            (Outcome::Deny, "AUTHENTICATION_FAILED"),
            (Outcome::Cancel, "AUTHENTICATION_CANCELLED"),
        ] {
            let gate = ScriptedGate::new(outcome);
            let orch = setup(&gate, &CountingEngine::default());
            orch.generate_key(&gated("k")).unwrap();

            let failure = orch.encrypt("k", "text").await.unwrap_err();
            assert_eq!(failure.code, code);
            assert_eq!(gate.calls(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_gate_times_out_as_cancellation() {
        let gate = ScriptedGate::new(Outcome::Hang);
        let orch = setup(&gate, &CountingEngine::default())
            .with_gate_timeout(Duration::from_millis(250));
        orch.generate_key(&gated("default-timeout")).unwrap();
        let own = KeyGenConfig::new("own-timeout").require_auth(Some(Duration::from_secs(1)));
        orch.generate_key(&own).unwrap();

        let failure = orch.encrypt("default-timeout", "text").await.unwrap_err();
        assert_eq!(failure.code, "AUTHENTICATION_CANCELLED");
        assert!(failure.message.contains("250ms"), "message: {}", failure.message);

        let failure = orch.encrypt("own-timeout", "text").await.unwrap_err();
        assert_eq!(failure.code, "AUTHENTICATION_CANCELLED");
        assert!(failure.message.contains("1s"), "message: {}", failure.message);
        assert_eq!(gate.calls(), 2);
    }

    #[tokio::test]
    async fn test_decrypt_with_another_keys_payload_fails_cleanly() {
        let gate = ScriptedGate::approving();
        let orch = setup(&gate, &CountingEngine::default());
        orch.generate_key(&KeyGenConfig::new("a")).unwrap();
        orch.generate_key(&KeyGenConfig::new("b")).unwrap();

        let token = orch.encrypt("a", "for a only").await.unwrap();
        let failure = orch.decrypt("b", &token).await.unwrap_err();
        assert_eq!(failure.code, "UNDERLYING_PROVIDER_ERROR");
    }

    #[tokio::test]
    async fn test_independent_aliases_run_concurrently() {
        let gate = ScriptedGate::approving();
        let orch = setup(&gate, &CountingEngine::default());
        orch.generate_key(&KeyGenConfig::new("left")).unwrap();
        orch.generate_key(&gated("right")).unwrap();

        let (left, right) = tokio::join!(orch.encrypt("left", "L"), orch.encrypt("right", "R"));
        let (left, right) = (left.unwrap(), right.unwrap());
        assert_ne!(left, right);

        assert_eq!(orch.decrypt("left", &left).await.unwrap(), "L");
        assert_eq!(orch.decrypt("right", &right).await.unwrap(), "R");
    }
}
