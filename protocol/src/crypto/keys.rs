//! # Key Management
//!
//! Keypair generation, signing and local persistence for hypermedia
//! identities.
//!
//! Two algorithms are supported:
//!
//! - **ECDSA P-256** is the default for new accounts. It is what browser
//!   crypto APIs can generate as non-extractable keys, so an identity created
//!   in a browser profile never has to leave it.
//! - **Ed25519** is accepted everywhere a key is verified, and can be
//!   generated for agents that prefer it.
//!
//! Signatures are 64 bytes for both. P-256 signatures use the fixed-width
//! `r || s` form over a SHA-256 digest of the message.
//!
//! ## Security considerations
//!
//! - Key generation uses `OsRng`.
//! - Secret bytes only leave this module through [`KeyPair::to_stored`],
//!   which exists for the local key store and nothing else.
//! - `Debug` prints the public principal, never secret material.

use ed25519_dalek::Signer as _;
use p256::ecdsa::signature::Signer as _;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::config::SIGNATURE_LENGTH;
use crate::identity::principal::Principal;

/// Errors that can occur during key operations.
///
/// Deliberately vague about *why* a key was rejected.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes")]
    InvalidPublicKey,

    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("invalid signature length: {0}")]
    InvalidSignatureLength(usize),
}

// ---------------------------------------------------------------------------
// KeyType
// ---------------------------------------------------------------------------

/// The signature algorithm behind a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "p256")]
    P256,
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::P256 => write!(f, "p256"),
            KeyType::Ed25519 => write!(f, "ed25519"),
        }
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A 64-byte signature, serialized as a CBOR byte string.
///
/// Construction from untrusted input goes through [`Signature::from_slice`],
/// which enforces the length. A zeroed signature is the placeholder written
/// into records while they are being signed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// All-zero placeholder of the algorithm's signature length.
    pub fn zeroed() -> Self {
        Self(vec![0u8; SIGNATURE_LENGTH])
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(KeyError::InvalidSignatureLength(bytes.len()));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Signature({}..)", &hex[..hex.len().min(16)])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let buf = serde_bytes::ByteBuf::deserialize(deserializer)?;
        Signature::from_slice(&buf).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// A signing keypair, exclusively owned by the context that generated it.
///
/// Not `Clone` and not `Serialize`. Share it behind an `Arc`; persist it
/// with [`to_stored`](Self::to_stored).
pub enum KeyPair {
    P256(p256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl KeyPair {
    /// Generate a fresh keypair of the given type with the OS RNG.
    pub fn generate(key_type: KeyType) -> Self {
        match key_type {
            KeyType::P256 => KeyPair::P256(p256::ecdsa::SigningKey::random(&mut OsRng)),
            KeyType::Ed25519 => KeyPair::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng)),
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            KeyPair::P256(_) => KeyType::P256,
            KeyPair::Ed25519(_) => KeyType::Ed25519,
        }
    }

    /// Native public key bytes: the uncompressed SEC1 point for P-256, the
    /// raw 32-byte key for Ed25519.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        match self {
            KeyPair::P256(sk) => sk
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            KeyPair::Ed25519(sk) => sk.verifying_key().to_bytes().to_vec(),
        }
    }

    /// The packed principal for this key. This is the account identity.
    pub fn principal(&self) -> Principal {
        match self {
            KeyPair::P256(sk) => {
                let compressed = sk.verifying_key().to_encoded_point(true);
                Principal::from_p256_compressed(compressed.as_bytes())
            }
            KeyPair::Ed25519(sk) => Principal::from_ed25519(&sk.verifying_key().to_bytes()),
        }
    }

    /// Sign a message.
    ///
    /// P-256 signing is deterministic (RFC 6979) but still fallible in the
    /// underlying API, so the error is surfaced rather than swallowed.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, crate::Error> {
        match self {
            KeyPair::P256(sk) => {
                let sig: p256::ecdsa::Signature = sk
                    .try_sign(message)
                    .map_err(|e| crate::Error::Signing(e.to_string()))?;
                Ok(Signature(sig.to_bytes().to_vec()))
            }
            KeyPair::Ed25519(sk) => Ok(Signature(sk.sign(message).to_bytes().to_vec())),
        }
    }

    /// Serialize for the local key store.
    pub fn to_stored(&self) -> StoredKey {
        let secret = match self {
            KeyPair::P256(sk) => hex::encode(sk.to_bytes()),
            KeyPair::Ed25519(sk) => hex::encode(sk.to_bytes()),
        };
        StoredKey {
            key_type: self.key_type(),
            secret,
        }
    }

    /// Rebuild a keypair from its stored form.
    pub fn from_stored(stored: &StoredKey) -> Result<Self, KeyError> {
        let bytes = hex::decode(&stored.secret).map_err(|_| KeyError::InvalidSecretKey)?;
        match stored.key_type {
            KeyType::P256 => p256::ecdsa::SigningKey::from_slice(&bytes)
                .map(KeyPair::P256)
                .map_err(|_| KeyError::InvalidSecretKey),
            KeyType::Ed25519 => {
                let arr: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| KeyError::InvalidSecretKey)?;
                Ok(KeyPair::Ed25519(ed25519_dalek::SigningKey::from_bytes(&arr)))
            }
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({}, {})", self.key_type(), self.principal())
    }
}

/// Persisted form of a [`KeyPair`], as written to the `keys` store.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKey {
    pub key_type: KeyType,
    pub secret: String,
}

impl fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoredKey({}, <redacted>)", self.key_type)
    }
}
