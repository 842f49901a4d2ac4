//! # Hashing and Content Addresses
//!
//! SHA-256 is the only hash in the protocol. Every content address is a
//! CIDv1 whose multihash is sha2-256 over the exact bytes being addressed:
//!
//! ```text
//!   CIDv1 = <version 1><codec varint><0x12><0x20><sha256(bytes)>
//!   codec = 0x71 (dag-cbor) for signed records, 0x55 (raw) for opaque blocks
//! ```
//!
//! Addresses are always computed over the bytes as stored or transmitted.
//! Nothing here re-canonicalizes.

use cid::multihash::Multihash;
use cid::Cid;
use sha2::{Digest, Sha256};

use crate::config::{DAG_CBOR_CODEC, RAW_CODEC, SHA2_256_CODE};
use crate::error::CodecError;

/// Compute the SHA-256 hash of the input data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// CIDv1 for `data` under the given multicodec.
pub fn cid_for(codec: u64, data: &[u8]) -> Result<Cid, CodecError> {
    let digest = sha256(data);
    let mh = Multihash::<64>::wrap(SHA2_256_CODE, &digest)
        .map_err(|e| CodecError::InvalidCid(e.to_string()))?;
    Ok(Cid::new_v1(codec, mh))
}

/// CIDv1 for a DAG-CBOR encoded record.
pub fn dag_cbor_cid(data: &[u8]) -> Result<Cid, CodecError> {
    cid_for(DAG_CBOR_CODEC, data)
}

/// CIDv1 for an opaque raw block.
pub fn raw_cid(data: &[u8]) -> Result<Cid, CodecError> {
    cid_for(RAW_CODEC, data)
}

/// Check that `data` hashes to `cid`, using the codec the CID declares.
///
/// Only sha2-256 multihashes are accepted; anything else cannot have been
/// produced by this protocol.
pub fn cid_matches(cid: &Cid, data: &[u8]) -> bool {
    if cid.hash().code() != SHA2_256_CODE {
        return false;
    }
    match cid_for(cid.codec(), data) {
        Ok(computed) => computed == *cid,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_cid_is_deterministic_and_codec_sensitive() {
        let a = dag_cbor_cid(b"block").unwrap();
        let b = dag_cbor_cid(b"block").unwrap();
        let raw = raw_cid(b"block").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, raw);
        assert_eq!(a.codec(), DAG_CBOR_CODEC);
        assert_eq!(raw.codec(), RAW_CODEC);
    }

    #[test]
    fn test_cid_text_form_is_base32_v1() {
        let cid = dag_cbor_cid(b"block").unwrap();
        assert!(cid.to_string().starts_with("bafy"));
        let raw = raw_cid(b"block").unwrap();
        assert!(raw.to_string().starts_with("bafk"));
    }

    #[test]
    fn test_cid_matches_detects_tamper() {
        let cid = dag_cbor_cid(b"block").unwrap();
        assert!(cid_matches(&cid, b"block"));
        assert!(!cid_matches(&cid, b"blocK"));
    }
}
