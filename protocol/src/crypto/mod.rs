//! # Cryptographic Primitives
//!
//! Everything security-related in the protocol flows through here:
//!
//! - **ECDSA P-256** and **Ed25519** for signatures.
//! - **SHA-256** for content addresses.
//!
//! Thin, type-safe wrappers around audited implementations. Nothing clever.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{cid_for, cid_matches, dag_cbor_cid, raw_cid, sha256};
pub use keys::{KeyError, KeyPair, KeyType, Signature, StoredKey};
pub use signatures::verify_raw;
