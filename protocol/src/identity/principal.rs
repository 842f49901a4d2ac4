//! # Principal (Account Identifier)
//!
//! A principal is the packed binary form of a public key:
//!
//! ```text
//!   P-256:    0x80 0x24 | 0x02/0x03 | X (32 bytes)        = 35 bytes
//!   Ed25519:  0xed 0x01 | key (32 bytes)                   = 34 bytes
//! ```
//!
//! The two leading bytes are the unsigned-varint multicodec for the key type.
//! The text form, the *account identifier* users see and paste, is the
//! base58btc encoding of those bytes with the `z` multibase prefix.
//!
//! Everything here is a pure function of the public key. The same key always
//! yields the same principal, and two different valid keys never collide,
//! because point compression is a bijection on curve points.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::config::{
    BASE58BTC_MULTIBASE_PREFIX, ED25519_PUBLIC_KEY_LENGTH, ED25519_PUB_VARINT_PREFIX,
    P256_COMPRESSED_KEY_LENGTH, P256_PUB_VARINT_PREFIX, P256_UNCOMPRESSED_KEY_LENGTH,
};
use crate::crypto::keys::{KeyType, Signature};
use crate::crypto::signatures::verify_raw;
use crate::error::Error;

/// Compress an uncompressed SEC1 P-256 point into a principal.
///
/// Input must be exactly `0x04 || X(32) || Y(32)`. The parity byte is `0x02`
/// when Y is even and `0x03` when odd. Points that are not on the curve are
/// rejected too.
pub fn compress_p256(uncompressed: &[u8]) -> Result<Principal, Error> {
    if uncompressed.len() != P256_UNCOMPRESSED_KEY_LENGTH || uncompressed[0] != 0x04 {
        return Err(Error::InvalidKeyFormat(format!(
            "expected {P256_UNCOMPRESSED_KEY_LENGTH}-byte uncompressed point, got {} bytes",
            uncompressed.len()
        )));
    }
    p256::PublicKey::from_sec1_bytes(uncompressed)
        .map_err(|_| Error::InvalidKeyFormat("point is not on the P-256 curve".into()))?;

    let x = &uncompressed[1..33];
    let y_last = uncompressed[64];
    let parity = if y_last & 1 == 0 { 0x02 } else { 0x03 };

    let mut compressed = Vec::with_capacity(P256_COMPRESSED_KEY_LENGTH);
    compressed.push(parity);
    compressed.extend_from_slice(x);
    Ok(Principal::from_p256_compressed(&compressed))
}

/// Packed public key with its multicodec prefix.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal(Vec<u8>);

impl Principal {
    /// Build from a 33-byte compressed P-256 point. Callers guarantee the
    /// length; use [`compress_p256`] or [`from_bytes`](Self::from_bytes) for
    /// untrusted input.
    pub(crate) fn from_p256_compressed(compressed: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(2 + compressed.len());
        bytes.extend_from_slice(&P256_PUB_VARINT_PREFIX);
        bytes.extend_from_slice(compressed);
        Self(bytes)
    }

    pub fn from_ed25519(key: &[u8; ED25519_PUBLIC_KEY_LENGTH]) -> Self {
        let mut bytes = Vec::with_capacity(2 + key.len());
        bytes.extend_from_slice(&ED25519_PUB_VARINT_PREFIX);
        bytes.extend_from_slice(key);
        Self(bytes)
    }

    /// Parse packed principal bytes, validating prefix and length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let principal = Self(bytes.to_vec());
        principal.key_type()?;
        Ok(principal)
    }

    /// Key type, detected from the multicodec prefix.
    pub fn key_type(&self) -> Result<KeyType, Error> {
        let bytes = &self.0;
        if bytes.len() < 2 {
            return Err(Error::InvalidKeyFormat("principal too short".into()));
        }
        let (prefix, key) = bytes.split_at(2);
        if prefix == P256_PUB_VARINT_PREFIX && key.len() == P256_COMPRESSED_KEY_LENGTH {
            if key[0] == 0x02 || key[0] == 0x03 {
                return Ok(KeyType::P256);
            }
            return Err(Error::InvalidKeyFormat("bad P-256 parity byte".into()));
        }
        if prefix == ED25519_PUB_VARINT_PREFIX && key.len() == ED25519_PUBLIC_KEY_LENGTH {
            return Ok(KeyType::Ed25519);
        }
        Err(Error::InvalidKeyFormat(format!(
            "unknown multicodec prefix {} or length {}",
            hex::encode(prefix),
            bytes.len()
        )))
    }

    /// The public key without the multicodec prefix.
    pub fn public_key(&self) -> &[u8] {
        self.0.get(2..).unwrap_or_default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Verify a signature made by this principal's key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        match self.key_type() {
            Ok(key_type) => verify_raw(key_type, self.public_key(), message, signature),
            Err(_) => false,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            BASE58BTC_MULTIBASE_PREFIX,
            bs58::encode(&self.0).into_string()
        )
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({self})")
    }
}

impl FromStr for Principal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s.strip_prefix(BASE58BTC_MULTIBASE_PREFIX).ok_or_else(|| {
            Error::InvalidKeyFormat(format!("missing '{BASE58BTC_MULTIBASE_PREFIX}' multibase prefix"))
        })?;
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| Error::InvalidKeyFormat(format!("bad base58: {e}")))?;
        Principal::from_bytes(&bytes)
    }
}

impl Serialize for Principal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Principal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let buf = serde_bytes::ByteBuf::deserialize(deserializer)?;
        Principal::from_bytes(&buf).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;
    use proptest::prelude::*;

    fn p256_uncompressed_from_seed(seed: [u8; 32]) -> Option<Vec<u8>> {
        let sk = p256::ecdsa::SigningKey::from_slice(&seed).ok()?;
        Some(sk.verifying_key().to_encoded_point(false).as_bytes().to_vec())
    }

    #[test]
    fn test_compress_matches_library_compression() {
        let kp = KeyPair::generate(KeyType::P256);
        let principal = compress_p256(&kp.public_key_bytes()).unwrap();
        assert_eq!(principal, kp.principal());
        assert_eq!(principal.as_bytes().len(), 35);
        assert_eq!(&principal.as_bytes()[..2], &[0x80, 0x24]);
    }

    #[test]
    fn test_parity_byte_follows_y() {
        let kp = KeyPair::generate(KeyType::P256);
        let pk = kp.public_key_bytes();
        let principal = compress_p256(&pk).unwrap();
        let expected = if pk[64] % 2 == 0 { 0x02 } else { 0x03 };
        assert_eq!(principal.as_bytes()[2], expected);
        assert_eq!(&principal.as_bytes()[3..], &pk[1..33]);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = compress_p256(&[0x04; 64]).unwrap_err();
        assert!(matches!(err, Error::InvalidKeyFormat(_)));
        let err = compress_p256(&[0x04; 33]).unwrap_err();
        assert!(matches!(err, Error::InvalidKeyFormat(_)));
    }

    #[test]
    fn test_rejects_point_off_curve() {
        let mut bad = vec![0x04];
        bad.extend_from_slice(&[0x11; 64]);
        assert!(matches!(compress_p256(&bad), Err(Error::InvalidKeyFormat(_))));
    }

    #[test]
    fn test_text_form_roundtrip() {
        for key_type in [KeyType::P256, KeyType::Ed25519] {
            let principal = KeyPair::generate(key_type).principal();
            let text = principal.to_string();
            assert!(text.starts_with('z'));
            let parsed: Principal = text.parse().unwrap();
            assert_eq!(parsed, principal);
            assert_eq!(parsed.key_type().unwrap(), key_type);
        }
    }

    #[test]
    fn test_p256_account_ids_share_prefix() {
        // Every P-256 principal starts with the same multicodec bytes, so the
        // base58 text form starts with the same characters too.
        let a = KeyPair::generate(KeyType::P256).principal().to_string();
        let b = KeyPair::generate(KeyType::P256).principal().to_string();
        assert_eq!(&a[..3], &b[..3]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("abc".parse::<Principal>().is_err());
        assert!("z0OIl".parse::<Principal>().is_err());
        assert!("z111".parse::<Principal>().is_err());
    }

    #[test]
    fn test_serializes_as_cbor_bytes() {
        let principal = KeyPair::generate(KeyType::Ed25519).principal();
        let bytes = serde_ipld_dagcbor::to_vec(&principal).unwrap();
        // Major type 2 (byte string), one-byte length follows: 0x58 0x22.
        assert_eq!(bytes[0], 0x58);
        assert_eq!(bytes[1] as usize, principal.as_bytes().len());
        let back: Principal = serde_ipld_dagcbor::from_slice(&bytes).unwrap();
        assert_eq!(back, principal);
    }

    proptest! {
        #[test]
        fn prop_compression_is_deterministic(seed in any::<[u8; 32]>()) {
            if let Some(pk) = p256_uncompressed_from_seed(seed) {
                let a = compress_p256(&pk).unwrap();
                let b = compress_p256(&pk).unwrap();
                prop_assert_eq!(a.to_string(), b.to_string());
            }
        }

        #[test]
        fn prop_distinct_points_distinct_ids(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            prop_assume!(a != b);
            if let (Some(pa), Some(pb)) = (p256_uncompressed_from_seed(a), p256_uncompressed_from_seed(b)) {
                prop_assume!(pa != pb);
                let ia = compress_p256(&pa).unwrap().to_string();
                let ib = compress_p256(&pb).unwrap().to_string();
                prop_assert_ne!(ia, ib);
            }
        }
    }
}
