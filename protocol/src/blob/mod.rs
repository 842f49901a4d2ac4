//! # Signed Blobs
//!
//! Every record in the protocol (changes, refs, capabilities, profiles,
//! comments) is a *blob*: a DAG-CBOR map carrying a `type`, a `signer`, and a
//! `sig`, addressed by the CID of its encoded bytes.
//!
//! ## Signing procedure
//!
//! ```text
//!   1. sig := 64 zero bytes
//!   2. bytes := dag-cbor(record)
//!   3. sig := sign(bytes)
//!   4. data := dag-cbor(record)        // final, stored, transmitted
//!   5. cid := CIDv1(dag-cbor, sha2-256(data))
//! ```
//!
//! Verification runs steps 1-2 on the received record and checks the
//! signature against `signer`. The content address is always over the final
//! signed bytes, so anyone holding `data` can check it without knowing the
//! record type.
//!
//! ## Canonical form
//!
//! DAG-CBOR requires map keys sorted by length, then bytewise. Record structs
//! declare their fields in that order so encoding is deterministic no matter
//! how the serializer treats struct fields. Optional fields are omitted when
//! absent, never written as null.

pub mod capability;
pub mod change;
pub mod comment;
pub mod profile;
pub mod reference;

use cid::Cid;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::hash::{cid_matches, dag_cbor_cid, raw_cid};
use crate::crypto::keys::{KeyPair, Signature};
use crate::error::{CodecError, Error, Result};
use crate::identity::principal::Principal;
use crate::storage::blockstore::Block;

pub use capability::{Capability, CapabilityRole};
pub use change::{AttrValue, Change, ChangeBody, DocumentBlock, DocumentOperation, KeyValue};
pub use comment::{Comment, UnsignedComment};
pub use profile::{Profile, ProfileFields};
pub use reference::Ref;

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Encode a value to canonical DAG-CBOR.
pub fn to_dag_cbor<T: Serialize>(value: &T) -> std::result::Result<Vec<u8>, CodecError> {
    serde_ipld_dagcbor::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a value from DAG-CBOR.
pub fn from_dag_cbor<T: DeserializeOwned>(data: &[u8]) -> std::result::Result<T, CodecError> {
    serde_ipld_dagcbor::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// SignedBlob
// ---------------------------------------------------------------------------

/// A record that carries its own signer and signature.
pub trait SignedBlob: Serialize + DeserializeOwned + Clone {
    /// Value of the `type` field.
    const BLOB_TYPE: &'static str;

    fn blob_type(&self) -> &str;
    fn signer(&self) -> &Principal;
    fn signature(&self) -> &Signature;
    fn set_signature(&mut self, sig: Signature);

    /// Bytes the signature covers: the record with `sig` zeroed.
    fn signing_bytes(&self) -> std::result::Result<Vec<u8>, CodecError> {
        let mut unsigned = self.clone();
        unsigned.set_signature(Signature::zeroed());
        to_dag_cbor(&unsigned)
    }
}

/// Sign a record in place of its placeholder.
///
/// Fails if the record's `signer` is not the keypair's principal; a record
/// signed by a key other than the one it names can never verify.
pub fn sign_blob<T: SignedBlob>(keypair: &KeyPair, mut blob: T) -> Result<T> {
    if *blob.signer() != keypair.principal() {
        return Err(Error::Signing("record signer does not match signing key".into()));
    }
    blob.set_signature(Signature::zeroed());
    let bytes = to_dag_cbor(&blob)?;
    let sig = keypair.sign(&bytes)?;
    blob.set_signature(sig);
    Ok(blob)
}

/// Check a record's signature against its declared signer.
pub fn verify_blob<T: SignedBlob>(blob: &T) -> Result<()> {
    if blob.blob_type() != T::BLOB_TYPE {
        return Err(CodecError::UnexpectedType {
            expected: T::BLOB_TYPE,
            found: blob.blob_type().to_string(),
        }
        .into());
    }
    let bytes = blob.signing_bytes()?;
    if blob.signer().verify(&bytes, blob.signature()) {
        Ok(())
    } else {
        Err(Error::SignatureVerificationFailed)
    }
}

// ---------------------------------------------------------------------------
// EncodedBlob
// ---------------------------------------------------------------------------

/// A record together with its canonical bytes and content address.
#[derive(Debug, Clone)]
pub struct EncodedBlob<T> {
    pub cid: Cid,
    pub data: Vec<u8>,
    pub decoded: T,
}

impl<T> EncodedBlob<T> {
    /// Bytes and address, for the blockstore or a submission endpoint.
    pub fn to_block(&self) -> Block {
        Block {
            cid: self.cid,
            data: self.data.clone(),
        }
    }
}

/// Encode a record and compute its content address.
pub fn encode_blob<T: Serialize>(value: T) -> Result<EncodedBlob<T>> {
    let data = to_dag_cbor(&value)?;
    let cid = dag_cbor_cid(&data)?;
    Ok(EncodedBlob {
        cid,
        data,
        decoded: value,
    })
}

/// Sign then encode. The usual way records are produced.
pub fn sign_and_encode<T: SignedBlob>(keypair: &KeyPair, blob: T) -> Result<EncodedBlob<T>> {
    let signed = sign_blob(keypair, blob)?;
    let encoded = encode_blob(signed)?;
    debug!(blob_type = T::BLOB_TYPE, cid = %encoded.cid, "signed blob");
    Ok(encoded)
}

/// Decode bytes fetched under `expected`, rejecting content that does not
/// hash to that address.
pub fn decode_blob<T: DeserializeOwned>(data: &[u8], expected: &Cid) -> Result<EncodedBlob<T>> {
    if !cid_matches(expected, data) {
        return Err(Error::ContentMismatch(expected.to_string()));
    }
    let decoded = from_dag_cbor(data)?;
    Ok(EncodedBlob {
        cid: *expected,
        data: data.to_vec(),
        decoded,
    })
}

/// Decode bytes received without an address (e.g. over a device-link
/// stream), compute the address, and verify the signature.
pub fn decode_signed<T: SignedBlob>(data: &[u8]) -> Result<EncodedBlob<T>> {
    let decoded: T = from_dag_cbor(data)?;
    verify_blob(&decoded)?;
    Ok(EncodedBlob {
        cid: dag_cbor_cid(data)?,
        data: data.to_vec(),
        decoded,
    })
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type", default)]
    blob_type: Option<String>,
}

fn check_signed<T: SignedBlob>(data: &[u8]) -> Result<()> {
    decode_signed::<T>(data).map(|_| ())
}

/// Check a DAG-CBOR blob arriving from outside before it is stored. It must
/// be a map; when its `type` names a signed record it must decode as that
/// record and its signature must verify. Returns the content address and
/// the type found, if any.
pub fn check_submitted(data: &[u8]) -> Result<(Cid, Option<String>)> {
    let tag: TypeTag = from_dag_cbor(data)?;
    match tag.blob_type.as_deref() {
        Some(Change::BLOB_TYPE) => check_signed::<Change>(data)?,
        Some(Ref::BLOB_TYPE) => check_signed::<Ref>(data)?,
        Some(Capability::BLOB_TYPE) => check_signed::<Capability>(data)?,
        Some(Profile::BLOB_TYPE) => check_signed::<Profile>(data)?,
        Some(Comment::BLOB_TYPE) => check_signed::<Comment>(data)?,
        _ => {}
    }
    Ok((dag_cbor_cid(data)?, tag.blob_type))
}

/// Content-address an opaque byte block (e.g. an icon image).
pub fn encode_raw(data: Vec<u8>) -> Result<Block> {
    let cid = raw_cid(&data)?;
    Ok(Block { cid, data })
}
