//! # Ref
//!
//! A signed pointer publishing a new head Change for a `(space, path)`
//! location. `generation` strictly increases per location and equals the
//! head change's `depth`.

use cid::Cid;
use serde::{Deserialize, Serialize};

use super::SignedBlob;
use crate::crypto::keys::Signature;
use crate::identity::principal::Principal;

/// Fields are declared in DAG-CBOR key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ref {
    pub ts: u64,
    pub sig: Signature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "type")]
    pub blob_type: String,
    pub heads: Vec<Cid>,
    /// Owning account, only when it differs from `signer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<Principal>,
    pub signer: Principal,
    /// Capability authorizing `signer` to publish into `space`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Cid>,
    pub generation: u64,
    #[serde(rename = "genesisBlob")]
    pub genesis_blob: Cid,
}

impl Ref {
    /// An unsigned ref. `space` equal to the signer and an empty or root
    /// `path` are dropped, so the record never names itself redundantly.
    pub fn new(
        signer: Principal,
        genesis_blob: Cid,
        head: Cid,
        generation: u64,
        ts: u64,
        space: Option<Principal>,
        path: Option<String>,
    ) -> Self {
        let space = space.filter(|s| *s != signer);
        let path = path.filter(|p| !p.is_empty() && p != "/");
        Self {
            ts,
            sig: Signature::zeroed(),
            path,
            blob_type: Self::BLOB_TYPE.to_string(),
            heads: vec![head],
            space,
            signer,
            capability: None,
            generation,
            genesis_blob,
        }
    }

    /// Attach the capability that lets a non-owner publish here.
    pub fn with_capability(mut self, capability: Cid) -> Self {
        self.capability = Some(capability);
        self
    }

    /// The account this ref publishes into.
    pub fn space(&self) -> &Principal {
        self.space.as_ref().unwrap_or(&self.signer)
    }
}

impl SignedBlob for Ref {
    const BLOB_TYPE: &'static str = "Ref";

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
    use crate::blob::{decode_signed, sign_and_encode, Change};
    use crate::crypto::keys::{KeyPair, KeyType};

    #[test]
    fn test_self_space_and_root_path_omitted() {
        let kp = KeyPair::generate(KeyType::P256);
        let g = sign_and_encode(&kp, Change::genesis(kp.principal())).unwrap();
        let r = Ref::new(
            kp.principal(),
            g.cid,
            g.cid,
            1,
            10,
            Some(kp.principal()),
            Some("".into()),
        );
        assert!(r.space.is_none());
        assert!(r.path.is_none());
        assert_eq!(r.space(), &kp.principal());
    }

    #[test]
    fn test_foreign_space_kept_and_roundtrips() {
        let kp = KeyPair::generate(KeyType::P256);
        let owner = KeyPair::generate(KeyType::P256).principal();
        let g = sign_and_encode(&kp, Change::genesis(owner.clone())).err();
        assert!(g.is_some(), "cannot sign a genesis for someone else");

        let own = sign_and_encode(&kp, Change::genesis(kp.principal())).unwrap();
        let r = Ref::new(
            kp.principal(),
            own.cid,
            own.cid,
            2,
            10,
            Some(owner.clone()),
            Some("/notes".into()),
        )
        .with_capability(own.cid);
        let encoded = sign_and_encode(&kp, r).unwrap();
        let back = decode_signed::<Ref>(&encoded.data).unwrap();
        assert_eq!(back.decoded.space(), &owner);
        assert_eq!(back.decoded.path.as_deref(), Some("/notes"));
        assert_eq!(back.cid, encoded.cid);
    }
}
