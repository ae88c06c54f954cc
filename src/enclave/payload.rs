// Keyguard — Encrypted Payload Codec
//
// Self-describing text token carrying the IV and the AES-GCM output:
//
//   v1.<base64url(iv)>.<base64url(ciphertext || tag)>
//
// `validate()` is a pure check with no decode side effects, so decrypt can
// reject foreign input before any key is loaded or any prompt is shown.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use super::EnclaveError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Version tag leading every token.
const VERSION_TAG: &str = "v1";

/// Segment separator. Never produced by the URL-safe base64 alphabet.
const SEPARATOR: char = '.';

/// AES-GCM initialization vector length in bytes.
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag length; the ciphertext segment is at least this long.
pub const TAG_LEN: usize = 16;

// ─── Payload ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    iv: [u8; IV_LEN],
    ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Build a payload, rejecting ciphertexts too short to carry a tag.
    pub fn new(iv: [u8; IV_LEN], ciphertext: Vec<u8>) -> Result<Self, EnclaveError> {
        if ciphertext.len() < TAG_LEN {
            return Err(EnclaveError::InvalidEncryptionText(format!(
                "ciphertext is {} bytes, expected at least {}",
                ciphertext.len(),
                TAG_LEN
            )));
        }
        Ok(Self { iv, ciphertext })
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Serialize to the text token.
    pub fn encode(&self) -> String {
        format!(
            "{VERSION_TAG}{SEPARATOR}{}{SEPARATOR}{}",
            URL_SAFE_NO_PAD.encode(self.iv),
            URL_SAFE_NO_PAD.encode(&self.ciphertext)
        )
    }

    /// Parse a token produced by [`EncryptedPayload::encode`].
    pub fn decode(text: &str) -> Result<Self, EnclaveError> {
        let (iv_segment, ct_segment) = split_segments(text)?;

        let iv_bytes = URL_SAFE_NO_PAD
            .decode(iv_segment)
            .map_err(|e| EnclaveError::InvalidEncryptionText(format!("bad IV encoding: {}", e)))?;
        let iv: [u8; IV_LEN] = iv_bytes.as_slice().try_into().map_err(|_| {
            EnclaveError::InvalidEncryptionText(format!(
                "IV is {} bytes, expected {}",
                iv_bytes.len(),
                IV_LEN
            ))
        })?;

        let ciphertext = URL_SAFE_NO_PAD.decode(ct_segment).map_err(|e| {
            EnclaveError::InvalidEncryptionText(format!("bad ciphertext encoding: {}", e))
        })?;

        Self::new(iv, ciphertext)
    }

    /// True only for tokens `decode` would accept.
    pub fn validate(text: &str) -> bool {
        let Ok((iv_segment, ct_segment)) = split_segments(text) else {
            return false;
        };
        decoded_len(iv_segment) == Some(IV_LEN)
            && decoded_len(ct_segment).is_some_and(|len| len >= TAG_LEN)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Split a token into its IV and ciphertext segments, checking the version tag.
fn split_segments(text: &str) -> Result<(&str, &str), EnclaveError> {
    let mut parts = text.split(SEPARATOR);
    let (Some(version), Some(iv), Some(ct), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(EnclaveError::InvalidEncryptionText(
            "expected exactly three segments".to_string(),
        ));
    };

    if version != VERSION_TAG {
        return Err(EnclaveError::InvalidEncryptionText(format!(
            "unknown payload version '{}'",
            version
        )));
    }
    if iv.is_empty() || ct.is_empty() {
        return Err(EnclaveError::InvalidEncryptionText(
            "empty payload segment".to_string(),
        ));
    }
    Ok((iv, ct))
}

fn decoded_len(segment: &str) -> Option<usize> {
    URL_SAFE_NO_PAD.decode(segment).ok().map(|bytes| bytes.len())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use proptest::prelude::*;

    fn sample() -> EncryptedPayload {
        EncryptedPayload::new([7u8; IV_LEN], (0u8..40).collect()).unwrap()
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let payload = sample();
        let decoded = EncryptedPayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded.iv(), payload.iv());
        assert_eq!(decoded.ciphertext(), payload.ciphertext());
    }

    #[test]
    fn test_encode_is_deterministic() {
        assert_eq!(sample().encode(), sample().encode());
    }

    #[test]
    fn test_encoded_token_is_accepted_by_validate() {
        let minimal = EncryptedPayload::new([0u8; IV_LEN], vec![0u8; TAG_LEN]).unwrap();
        assert!(EncryptedPayload::validate(&minimal.encode()));
        assert!(EncryptedPayload::validate(&sample().encode()));
    }

    #[test]
    fn test_validate_rejects_empty_string() {
        assert!(!EncryptedPayload::validate(""));
    }

    #[test]
    fn test_validate_rejects_truncated_token() {
        let token = sample().encode();
        let cut = token.rfind(SEPARATOR).unwrap();
        assert!(!EncryptedPayload::validate(&token[..cut]));
        assert!(!EncryptedPayload::validate(&token[..cut + 1]));
        // Cutting the ciphertext below the tag length
        let (head, ct) = token.split_at(cut + 1);
        assert!(!EncryptedPayload::validate(&format!("{}{}", head, &ct[..8])));
    }

    #[test]
    fn test_validate_rejects_swapped_segments() {
        let payload = sample();
        let swapped = format!(
            "v1.{}.{}",
            URL_SAFE_NO_PAD.encode(payload.ciphertext()),
            URL_SAFE_NO_PAD.encode(payload.iv())
        );
        assert!(!EncryptedPayload::validate(&swapped));
    }

    #[test]
    fn test_validate_rejects_extra_delimiters() {
        let token = sample().encode();
        assert!(!EncryptedPayload::validate(&format!("{}.", token)));
        assert!(!EncryptedPayload::validate(&format!(".{}", token)));
        assert!(!EncryptedPayload::validate(&token.replacen('.', "..", 1)));
    }

    #[test]
    fn test_validate_rejects_unrelated_text() {
        assert!(!EncryptedPayload::validate("hello world"));
        assert!(!EncryptedPayload::validate("v2.AAAAAAAAAAAAAAAA.AAAAAAAAAAAAAAAAAAAAAA"));
        assert!(!EncryptedPayload::validate("v1.!!!.???"));
    }

    #[test]
    fn test_decode_rejects_what_validate_rejects() {
        for bad in ["", "v1", "v1..", "v1.AAAA.AAAA", "nonsense"] {
            assert!(!EncryptedPayload::validate(bad));
            let err = EncryptedPayload::decode(bad).unwrap_err();
            assert_eq!(err.code(), "INVALID_ENCRYPTION_TEXT", "input: {:?}", bad);
        }
    }

    #[test]
    fn test_new_rejects_short_ciphertext() {
        assert!(EncryptedPayload::new([0u8; IV_LEN], vec![1, 2, 3]).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Any IV and tag-bearing ciphertext survive encoding unchanged.
        #[test]
        fn prop_encoded_payload_decodes_to_itself(
            iv in any::<[u8; IV_LEN]>(),
            ciphertext in prop::collection::vec(any::<u8>(), TAG_LEN..512),
        ) {
            let payload = EncryptedPayload::new(iv, ciphertext).unwrap();
            let token = payload.encode();

            prop_assert!(EncryptedPayload::validate(&token));
            prop_assert_eq!(EncryptedPayload::decode(&token).unwrap(), payload);
        }

        /// Ciphertexts too short to hold a tag are never accepted.
        #[test]
        fn prop_short_ciphertext_is_rejected(
            iv in any::<[u8; IV_LEN]>(),
            ciphertext in prop::collection::vec(any::<u8>(), 0..TAG_LEN),
        ) {
            let token = format!(
                "v1.{}.{}",
                URL_SAFE_NO_PAD.encode(iv),
                URL_SAFE_NO_PAD.encode(&ciphertext)
            );
            prop_assert!(!EncryptedPayload::validate(&token));
            prop_assert!(EncryptedPayload::decode(&token).is_err());
            prop_assert!(EncryptedPayload::new(iv, ciphertext).is_err());
        }

        /// Arbitrary text is either rejected by both checks or accepted by both.
        #[test]
        fn prop_validate_agrees_with_decode(text in "\\PC{0,64}") {
            prop_assert_eq!(
                EncryptedPayload::validate(&text),
                EncryptedPayload::decode(&text).is_ok()
            );
        }
    }
}
