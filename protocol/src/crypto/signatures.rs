//! # Digital Signatures
//!
//! Verification for both supported algorithms.
//!
//! Signing lives on [`KeyPair`](super::keys::KeyPair) because it needs the
//! secret. Verification only needs a public key, so it lives here and is
//! reached through [`Principal::verify`](crate::identity::Principal::verify).
//!
//! ## Strictness
//!
//! Ed25519 uses `verify_strict`. P-256 accepts either `s` form, since
//! browser crypto APIs do not normalize it.

use ed25519_dalek::VerifyingKey as EdVerifyingKey;
use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature as P256Signature, VerifyingKey as P256VerifyingKey};

use super::keys::{KeyType, Signature};

/// Verify `signature` over `message` against a raw public key.
///
/// `raw_key` is the SEC1 point (compressed or not) for P-256, or the 32-byte
/// key for Ed25519. Returns `false` for malformed keys or signatures, never
/// panics.
pub fn verify_raw(key_type: KeyType, raw_key: &[u8], message: &[u8], signature: &Signature) -> bool {
    match key_type {
        KeyType::P256 => {
            let Ok(vk) = P256VerifyingKey::from_sec1_bytes(raw_key) else {
                return false;
            };
            let Ok(sig) = P256Signature::from_slice(signature.as_bytes()) else {
                return false;
            };
            vk.verify(message, &sig).is_ok()
        }
        KeyType::Ed25519 => {
            let Ok(key_bytes) = <[u8; 32]>::try_from(raw_key) else {
                return false;
            };
            let Ok(vk) = EdVerifyingKey::from_bytes(&key_bytes) else {
                return false;
            };
            let Ok(sig_bytes) = <[u8; 64]>::try_from(signature.as_bytes()) else {
                return false;
            };
            let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            vk.verify_strict(message, &sig).is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;

    #[test]
    fn test_verify_raw_with_uncompressed_p256() {
        let kp = KeyPair::generate(KeyType::P256);
        let sig = kp.sign(b"payload").unwrap();
        assert!(verify_raw(KeyType::P256, &kp.public_key_bytes(), b"payload", &sig));
        assert!(!verify_raw(KeyType::P256, &kp.public_key_bytes(), b"payloaD", &sig));
    }

    #[test]
    fn test_verify_raw_rejects_garbage_key() {
        let kp = KeyPair::generate(KeyType::Ed25519);
        let sig = kp.sign(b"payload").unwrap();
        assert!(!verify_raw(KeyType::Ed25519, &[1, 2, 3], b"payload", &sig));
        assert!(!verify_raw(KeyType::P256, &[0x04; 65], b"payload", &sig));
    }
}
