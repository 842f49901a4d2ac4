//! # Profile
//!
//! Signed metadata about an identity. With `alias` set, the record is a
//! *profile alias*: "this signer is an alias of that account", which is the
//! last thing a Joiner writes during device linking.

use cid::Cid;
use serde::{Deserialize, Serialize};

use super::SignedBlob;
use crate::crypto::keys::Signature;
use crate::identity::principal::Principal;

/// Fields are declared in DAG-CBOR key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub ts: u64,
    pub sig: Signature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub blob_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Cid>,
    pub signer: Principal,
    /// The account this profile describes, when not the signer itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Profile fields to publish. Absent fields stay absent on the record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileFields {
    pub name: Option<String>,
    pub avatar: Option<Cid>,
    pub description: Option<String>,
}

impl Profile {
    /// An unsigned profile describing `account` (or the signer when `None`
    /// or equal to it).
    pub fn new(signer: Principal, fields: ProfileFields, account: Option<Principal>, ts: u64) -> Self {
        let account = account.filter(|a| *a != signer);
        Self {
            ts,
            sig: Signature::zeroed(),
            name: fields.name,
            blob_type: Self::BLOB_TYPE.to_string(),
            alias: None,
            avatar: fields.avatar,
            signer,
            account,
            description: fields.description,
        }
    }

    /// An unsigned profile alias pointing `signer` at `alias`.
    pub fn alias(signer: Principal, alias: Principal, ts: u64) -> Self {
        Self {
            ts,
            sig: Signature::zeroed(),
            name: None,
            blob_type: Self::BLOB_TYPE.to_string(),
            alias: Some(alias),
            avatar: None,
            signer,
            account: None,
            description: None,
        }
    }
}

impl SignedBlob for Profile {
    const BLOB_TYPE: &'static str = "Profile";

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
    use crate::blob::{decode_signed, encode_raw, sign_and_encode};
    use crate::crypto::keys::{KeyPair, KeyType};

    #[test]
    fn test_profile_omits_self_account() {
        let kp = KeyPair::generate(KeyType::P256);
        let icon = encode_raw(b"icon".to_vec()).unwrap();
        let fields = ProfileFields {
            name: Some("Fresh Leaf".into()),
            avatar: Some(icon.cid),
            description: None,
        };
        let p = Profile::new(kp.principal(), fields, Some(kp.principal()), 5);
        assert!(p.account.is_none());
        let encoded = sign_and_encode(&kp, p).unwrap();
        let back = decode_signed::<Profile>(&encoded.data).unwrap();
        assert_eq!(back.decoded.avatar, Some(icon.cid));
        assert_eq!(back.decoded.name.as_deref(), Some("Fresh Leaf"));
    }

    #[test]
    fn test_alias_roundtrip() {
        let joiner = KeyPair::generate(KeyType::P256);
        let account = KeyPair::generate(KeyType::Ed25519).principal();
        let alias = Profile::alias(joiner.principal(), account.clone(), 102);
        let encoded = sign_and_encode(&joiner, alias).unwrap();
        let back = decode_signed::<Profile>(&encoded.data).unwrap();
        assert_eq!(back.decoded.alias, Some(account));
        assert_eq!(back.decoded.ts, 102);
    }
}
