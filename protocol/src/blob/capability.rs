//! # Capability
//!
//! A signed grant: `signer` lets `delegate` act for it, in `role`,
//! optionally restricted to a `path`. Device linking exchanges two of these,
//! one in each direction, both with role `AGENT`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::SignedBlob;
use crate::crypto::keys::Signature;
use crate::identity::principal::Principal;

/// What the delegate may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CapabilityRole {
    /// May publish changes into the granted space.
    Writer,
    /// May act as the grantor's agent, e.g. a linked device.
    Agent,
}

impl From<CapabilityRole> for String {
    fn from(role: CapabilityRole) -> Self {
        role.to_string()
    }
}

impl TryFrom<String> for CapabilityRole {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "WRITER" => Ok(CapabilityRole::Writer),
            "AGENT" => Ok(CapabilityRole::Agent),
            other => Err(format!("unknown capability role {other:?}")),
        }
    }
}

impl fmt::Display for CapabilityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityRole::Writer => write!(f, "WRITER"),
            CapabilityRole::Agent => write!(f, "AGENT"),
        }
    }
}

/// Fields are declared in DAG-CBOR key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub ts: u64,
    pub sig: Signature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub role: CapabilityRole,
    #[serde(rename = "type")]
    pub blob_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub signer: Principal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<Principal>,
    pub delegate: Principal,
}

impl Capability {
    /// An unsigned capability.
    pub fn new(signer: Principal, delegate: Principal, role: CapabilityRole, ts: u64) -> Self {
        Self {
            ts,
            sig: Signature::zeroed(),
            path: None,
            role,
            blob_type: Self::BLOB_TYPE.to_string(),
            label: None,
            signer,
            audience: None,
            delegate,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_audience(mut self, audience: Principal) -> Self {
        self.audience = Some(audience);
        self
    }
}

impl SignedBlob for Capability {
    const BLOB_TYPE: &'static str = "Capability";

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
    use crate::blob::{decode_signed, from_dag_cbor, sign_and_encode, verify_blob};
    use crate::crypto::keys::{KeyPair, KeyType};
    use crate::error::Error;

    #[test]
    fn test_capability_roundtrip_and_verify() {
        let grantor = KeyPair::generate(KeyType::P256);
        let delegate = KeyPair::generate(KeyType::P256).principal();
        let cap = Capability::new(grantor.principal(), delegate.clone(), CapabilityRole::Agent, 42)
            .with_label("Laptop")
            .with_path("/projects");
        let encoded = sign_and_encode(&grantor, cap).unwrap();
        let back = decode_signed::<Capability>(&encoded.data).unwrap();
        assert_eq!(back.decoded, encoded.decoded);
        assert_eq!(back.decoded.delegate, delegate);
        assert_eq!(back.decoded.role, CapabilityRole::Agent);
    }

    #[test]
    fn test_role_wire_form() {
        let grantor = KeyPair::generate(KeyType::Ed25519);
        let cap = Capability::new(
            grantor.principal(),
            grantor.principal(),
            CapabilityRole::Writer,
            1,
        );
        let encoded = sign_and_encode(&grantor, cap).unwrap();
        #[derive(serde::Deserialize)]
        struct RoleOnly {
            role: String,
        }
        let role: RoleOnly = from_dag_cbor(&encoded.data).unwrap();
        assert_eq!(role.role, "WRITER");
    }

    #[test]
    fn test_tampered_delegate_fails_verification() {
        let grantor = KeyPair::generate(KeyType::P256);
        let cap = Capability::new(
            grantor.principal(),
            KeyPair::generate(KeyType::P256).principal(),
            CapabilityRole::Agent,
            7,
        );
        let mut signed = sign_and_encode(&grantor, cap).unwrap().decoded;
        signed.delegate = KeyPair::generate(KeyType::P256).principal();
        assert!(matches!(
            verify_blob(&signed),
            Err(Error::SignatureVerificationFailed)
        ));
    }
}
