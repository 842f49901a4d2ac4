//! # Change
//!
//! One immutable step in an account's document history.
//!
//! | Field     | Genesis | Other changes                         |
//! |-----------|---------|---------------------------------------|
//! | `ts`      | `0`     | wall clock, ms                        |
//! | `body`    | -       | `{ops, opCount}`                      |
//! | `deps`    | -       | CIDs this change builds on            |
//! | `depth`   | -       | `1 + max(depth of deps)`, genesis = 0 |
//! | `genesis` | -       | CID of the account's genesis change   |

use cid::Cid;
use serde::{Deserialize, Serialize};

use super::SignedBlob;
use crate::crypto::keys::Signature;
use crate::error::{CodecError, Result};
use crate::identity::principal::Principal;

/// A signed document mutation. Fields are declared in DAG-CBOR key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
    pub sig: Signature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<ChangeBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps: Option<Vec<Cid>>,
    #[serde(rename = "type")]
    pub blob_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u64>,
    pub signer: Principal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genesis: Option<Cid>,
}

/// Ordered operations plus their count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBody {
    pub ops: Vec<DocumentOperation>,
    #[serde(rename = "opCount")]
    pub op_count: u64,
}

impl ChangeBody {
    pub fn new(ops: Vec<DocumentOperation>) -> Self {
        let op_count = ops.len() as u64;
        Self { ops, op_count }
    }
}

/// Document operations. The content schema itself is opaque to the
/// protocol; these are the envelopes the account and profile flows emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DocumentOperation {
    SetAttributes {
        attrs: Vec<KeyValue>,
    },
    ReplaceBlock {
        block: DocumentBlock,
    },
    MoveBlocks {
        blocks: Vec<String>,
        parent: String,
        #[serde(rename = "leftSibling")]
        left_sibling: String,
    },
    DeleteBlocks {
        blocks: Vec<String>,
    },
}

impl DocumentOperation {
    /// Shorthand for a single-attribute `SetAttributes`.
    pub fn set_attribute(key: &str, value: AttrValue) -> Self {
        DocumentOperation::SetAttributes {
            attrs: vec![KeyValue {
                key: vec![key.to_string()],
                value,
            }],
        }
    }
}

/// A path of attribute keys and the value to set there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Vec<String>,
    pub value: AttrValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

/// A content block. Used by change operations and comment bodies alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub text: String,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DocumentBlock>,
}

impl DocumentBlock {
    pub fn paragraph(id: &str, text: &str) -> Self {
        Self {
            id: id.to_string(),
            link: None,
            text: text.to_string(),
            block_type: "Paragraph".to_string(),
            children: Vec::new(),
        }
    }
}

impl Change {
    /// The unsigned genesis change of an account.
    pub fn genesis(signer: Principal) -> Self {
        Self {
            ts: Some(0),
            sig: Signature::zeroed(),
            body: None,
            deps: None,
            blob_type: Self::BLOB_TYPE.to_string(),
            depth: None,
            signer,
            genesis: None,
        }
    }

    /// An unsigned non-genesis change.
    pub fn new(
        signer: Principal,
        genesis: Cid,
        deps: Vec<Cid>,
        depth: u64,
        ops: Vec<DocumentOperation>,
        ts: u64,
    ) -> Self {
        Self {
            ts: Some(ts),
            sig: Signature::zeroed(),
            body: Some(ChangeBody::new(ops)),
            deps: Some(deps),
            blob_type: Self::BLOB_TYPE.to_string(),
            depth: Some(depth),
            signer,
            genesis: Some(genesis),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.genesis.is_none()
    }

    /// Recorded depth. Genesis counts as zero.
    pub fn depth_or_zero(&self) -> u64 {
        self.depth.unwrap_or(0)
    }

    /// A genesis carries none of `genesis`/`deps`/`depth`/`body`; every
    /// other change carries all four.
    pub fn validate_shape(&self) -> Result<()> {
        let present = [
            self.genesis.is_some(),
            self.deps.is_some(),
            self.depth.is_some(),
            self.body.is_some(),
        ];
        if present.iter().all(|p| *p) || present.iter().all(|p| !*p) {
            if let Some(body) = &self.body {
                if body.op_count != body.ops.len() as u64 {
                    return Err(CodecError::Decode("change opCount disagrees with ops".into()).into());
                }
            }
            Ok(())
        } else {
            Err(CodecError::Decode("change mixes genesis and non-genesis fields".into()).into())
        }
    }
}

impl SignedBlob for Change {
    const BLOB_TYPE: &'static str = "Change";

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
