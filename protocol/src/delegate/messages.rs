//! Messages exchanged between a signing delegate and an identity provider.
//! The set is closed; each side only ever sends its own enum.

use serde::{Deserialize, Serialize};

use crate::ability::Ability;
use crate::blob::UnsignedComment;
use crate::crypto::keys::Signature;

/// Rejection reason sent when no usable capability exists. The provider
/// uses it for every refusal it cannot explain without leaking metadata.
pub const NO_IDENTITY: &str = "NoIdentity";

/// Rejection reason for failures that are not about capabilities.
pub const SIGNING_FAILED: &str = "SigningFailed";

/// Delegate → provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DelegateMessage {
    Init,
    #[serde(rename_all = "camelCase")]
    RequestSignComment {
        signature_id: String,
        comment: UnsignedComment,
    },
}

/// Provider → delegate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProviderMessage {
    Ready,
    Abilities {
        abilities: Vec<Ability>,
    },
    #[serde(rename_all = "camelCase")]
    ResolveSignature {
        signature_id: String,
        signature: Signature,
    },
    #[serde(rename_all = "camelCase")]
    RejectSignature {
        signature_id: String,
        error: String,
    },
}

impl ProviderMessage {
    /// The request id this message answers, if it answers one.
    pub fn signature_id(&self) -> Option<&str> {
        match self {
            ProviderMessage::ResolveSignature { signature_id, .. }
            | ProviderMessage::RejectSignature { signature_id, .. } => Some(signature_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_tags() {
        assert_eq!(serde_json::to_value(DelegateMessage::Init).unwrap(), json!({"type": "init"}));
        assert_eq!(serde_json::to_value(ProviderMessage::Ready).unwrap(), json!({"type": "ready"}));

        let reject = ProviderMessage::RejectSignature {
            signature_id: "s1".into(),
            error: NO_IDENTITY.into(),
        };
        assert_eq!(
            serde_json::to_value(&reject).unwrap(),
            json!({"type": "rejectSignature", "signatureId": "s1", "error": "NoIdentity"})
        );
        assert_eq!(reject.signature_id(), Some("s1"));
    }

    #[test]
    fn test_parse_abilities_push() {
        let msg: ProviderMessage =
            serde_json::from_value(json!({"type": "abilities", "abilities": []})).unwrap();
        assert_eq!(msg, ProviderMessage::Abilities { abilities: vec![] });
        assert_eq!(msg.signature_id(), None);
    }
}
