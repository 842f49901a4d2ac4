//! # Comment
//!
//! A signed comment on a document version. Comments are what a foreign
//! origin asks an identity provider to sign: the requester builds an
//! [`UnsignedComment`], the provider signs the exact record
//! [`Comment::from_unsigned`] produces, and the requester reassembles it with
//! the returned signature.

use cid::Cid;
use serde::{Deserialize, Serialize};

use super::change::DocumentBlock;
use super::SignedBlob;
use crate::crypto::keys::Signature;
use crate::identity::principal::Principal;

/// Fields are declared in DAG-CBOR key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub ts: u64,
    pub sig: Signature,
    pub body: Vec<DocumentBlock>,
    pub path: String,
    #[serde(rename = "type")]
    pub blob_type: String,
    pub space: Principal,
    pub signer: Principal,
    pub version: Vec<Cid>,
    #[serde(rename = "threadRoot", default, skip_serializing_if = "Option::is_none")]
    pub thread_root: Option<Cid>,
    #[serde(rename = "replyParent", default, skip_serializing_if = "Option::is_none")]
    pub reply_parent: Option<Cid>,
}

/// Everything a comment carries except its signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedComment {
    pub signer: Principal,
    pub space: Principal,
    pub path: String,
    pub version: Vec<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_parent: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_root: Option<Cid>,
    pub body: Vec<DocumentBlock>,
    pub ts: u64,
}

impl Comment {
    /// The record for `unsigned` carrying `sig`. With a zeroed signature this
    /// is exactly what the provider signs.
    pub fn from_unsigned(unsigned: UnsignedComment, sig: Signature) -> Self {
        Self {
            ts: unsigned.ts,
            sig,
            body: unsigned.body,
            path: unsigned.path,
            blob_type: Self::BLOB_TYPE.to_string(),
            space: unsigned.space,
            signer: unsigned.signer,
            version: unsigned.version,
            thread_root: unsigned.thread_root,
            reply_parent: unsigned.reply_parent,
        }
    }
}

impl SignedBlob for Comment {
    const BLOB_TYPE: &'static str = "Comment";

    fn blob_type(&self) -> &str {
        &self.blob_type
    }
    fn signer(&self) -> &Principal {
        &self.signer
    }
    fn signature(&self) -> &Signature {
        &self.sig
    }
    fn set_signature(&mut self, sig: Signature) {
        self.sig = sig;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{decode_signed, sign_blob, verify_blob, Change, sign_and_encode};
    use crate::crypto::keys::{KeyPair, KeyType};

    #[test]
    fn test_detached_signature_reassembles() {
        let kp = KeyPair::generate(KeyType::P256);
        let doc = sign_and_encode(&kp, Change::genesis(kp.principal())).unwrap();
        let unsigned = UnsignedComment {
            signer: kp.principal(),
            space: kp.principal(),
            path: "/hello".into(),
            version: vec![doc.cid],
            reply_parent: None,
            thread_root: Some(doc.cid),
            body: vec![DocumentBlock::paragraph("c1", "nice post")],
            ts: 1_700_000_000_000,
        };

        // Provider side signs the placeholder record.
        let signed = sign_blob(&kp, Comment::from_unsigned(unsigned.clone(), Signature::zeroed())).unwrap();

        // Requester side rebuilds from its own copy plus the signature.
        let rebuilt = Comment::from_unsigned(unsigned, signed.sig.clone());
        verify_blob(&rebuilt).unwrap();

        let encoded = sign_and_encode(&kp, rebuilt).unwrap();
        let back = decode_signed::<Comment>(&encoded.data).unwrap();
        assert_eq!(back.decoded.thread_root, Some(doc.cid));
    }
}
