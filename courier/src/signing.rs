//! HMAC signing for webhook payloads.
//!
//! The signature is computed over the raw serialized request body and sent as
//! `X-Webhook-Signature-256: sha256=<hex>`. Subscribers verify by recomputing
//! the HMAC of the body with their registered secret and comparing in
//! constant time, rejecting on mismatch or a stale `X-Webhook-Timestamp`.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};

/// Prefix for webhook secrets
pub const SECRET_PREFIX: &str = "whsec_";

/// HMAC algorithm used for the signature header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl SignatureAlgorithm {
    /// Header carrying the signature for this algorithm.
    pub fn header_name(&self) -> &'static str {
        match self {
            Self::Sha256 => "X-Webhook-Signature-256",
            Self::Sha512 => "X-Webhook-Signature-512",
        }
    }

    /// Scheme prefix inside the header value, e.g. `sha256=<hex>`.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

/// Generate a new webhook secret.
///
/// Returns a `whsec_` prefixed base64-encoded 32-byte random secret.
pub fn generate_secret() -> String {
    use rand::RngCore;
    use rand::rngs::OsRng;

    let mut secret_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut secret_bytes);

    format!("{}{}", SECRET_PREFIX, BASE64_STANDARD.encode(secret_bytes))
}

/// Key material for the HMAC. `whsec_` secrets are base64-decoded; anything
/// else (externally supplied secrets) is used as raw bytes.
fn secret_bytes(secret: &str) -> Vec<u8> {
    secret
        .strip_prefix(SECRET_PREFIX)
        .and_then(|encoded| BASE64_STANDARD.decode(encoded).ok())
        .unwrap_or_else(|| secret.as_bytes().to_vec())
}

/// Sign a serialized payload body.
///
/// Returns the header value in the form `sha256=<hex>`.
pub fn sign_payload(algorithm: SignatureAlgorithm, secret: &str, body: &[u8]) -> String {
    let key = secret_bytes(secret);
    let digest = match algorithm {
        SignatureAlgorithm::Sha256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(&key).expect("HMAC can take key of any size");
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        SignatureAlgorithm::Sha512 => {
            let mut mac =
                Hmac::<Sha512>::new_from_slice(&key).expect("HMAC can take key of any size");
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
    };

    format!("{}={}", algorithm.scheme(), digest)
}

/// Verify a signature header value against a raw body.
///
/// Subscribers can call this with the received `X-Webhook-Signature-256`
/// value; comparison is constant-time.
pub fn verify_signature(
    algorithm: SignatureAlgorithm,
    secret: &str,
    body: &[u8],
    signature: &str,
) -> bool {
    let expected = sign_payload(algorithm, secret, body);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret() {
        let secret = generate_secret();
        assert!(secret.starts_with(SECRET_PREFIX));
        assert_eq!(secret_bytes(&secret).len(), 32);
    }

    #[test]
    fn test_raw_secret_used_as_is() {
        assert_eq!(secret_bytes("plain-secret"), b"plain-secret".to_vec());
    }

    #[test]
    fn test_signature_deterministic() {
        let secret = generate_secret();
        let body = br#"{"event":"wellness.mood_entry","data":{}}"#;

        let first = sign_payload(SignatureAlgorithm::Sha256, &secret, body);
        let second = sign_payload(SignatureAlgorithm::Sha256, &secret, body);
        assert_eq!(first, second);
        assert!(first.starts_with("sha256="));
        // SHA256 = 32 bytes = 64 hex chars
        assert_eq!(first.len(), "sha256=".len() + 64);
    }

    #[test]
    fn test_one_byte_change_changes_signature() {
        let secret = generate_secret();
        let signature = sign_payload(SignatureAlgorithm::Sha256, &secret, b"payload-a");
        let other = sign_payload(SignatureAlgorithm::Sha256, &secret, b"payload-b");
        assert_ne!(signature, other);
    }

    #[test]
    fn test_sign_and_verify() {
        let secret = generate_secret();
        let body = br#"{"test": 2432232314}"#;

        let signature = sign_payload(SignatureAlgorithm::Sha256, &secret, body);
        assert!(verify_signature(SignatureAlgorithm::Sha256, &secret, body, &signature));

        // Wrong body should fail
        assert!(!verify_signature(SignatureAlgorithm::Sha256, &secret, b"wrong", &signature));

        // Wrong secret should fail
        let other_secret = generate_secret();
        assert!(!verify_signature(SignatureAlgorithm::Sha256, &other_secret, body, &signature));

        // Malformed signature should fail
        assert!(!verify_signature(SignatureAlgorithm::Sha256, &secret, body, "sha256=nope"));
    }

    #[test]
    fn test_sha512_variant() {
        let secret = generate_secret();
        let body = b"payload";

        let signature = sign_payload(SignatureAlgorithm::Sha512, &secret, body);
        assert!(signature.starts_with("sha512="));
        assert_eq!(signature.len(), "sha512=".len() + 128);
        assert!(verify_signature(SignatureAlgorithm::Sha512, &secret, body, &signature));
        assert_eq!(SignatureAlgorithm::Sha512.header_name(), "X-Webhook-Signature-512");
    }
}
