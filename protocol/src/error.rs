//! # Protocol Errors
//!
//! One taxonomy for the whole identity protocol. Lower layers (key parsing,
//! the DAG-CBOR codec, the local store, the byte-stream transport) keep their
//! own narrow error enums and convert into [`Error`] at the boundary.
//!
//! | Variant                        | Fatal? | Retry?                      |
//! |--------------------------------|--------|-----------------------------|
//! | `InvalidKeyFormat`             | yes    | no                          |
//! | `DependencyUnavailable`        | no     | yes, whole publish          |
//! | `SignatureVerificationFailed`  | yes    | no, never store the record  |
//! | `NoIdentity`                   | no     | no                          |
//! | `AllDialsFailed`               | no     | user-initiated              |
//! | `TimestampOutOfWindow`         | yes    | no                          |
//!
//! `NoIdentity` is deliberately vague. It is the only thing a foreign origin
//! ever learns about why a signing request failed.

use crate::crypto::keys::KeyError;
use crate::storage::StorageError;
use crate::transport::TransportError;

/// Errors raised by the DAG-CBOR codec and content addressing.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("dag-cbor encode failed: {0}")]
    Encode(String),

    #[error("dag-cbor decode failed: {0}")]
    Decode(String),

    #[error("invalid content address: {0}")]
    InvalidCid(String),

    #[error("unexpected record type: expected {expected}, found {found}")]
    UnexpectedType { expected: &'static str, found: String },
}

/// Top-level error for every protocol operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("NoIdentity")]
    NoIdentity,

    #[error("all dial attempts failed ({attempts} candidates)")]
    AllDialsFailed { attempts: usize },

    #[error("timestamp {ts} outside accepted window")]
    TimestampOutOfWindow { ts: u64 },

    #[error("an account already exists in this context")]
    AccountExists,

    #[error("a device link is already in progress for {0}")]
    LinkInProgress(String),

    #[error("device link session expired")]
    SessionExpired,

    #[error("device link token rejected")]
    TokenRejected,

    #[error("handshake aborted: {0}")]
    HandshakeAborted(String),

    #[error("content does not match address {0}")]
    ContentMismatch(String),

    #[error("signing request rejected: {0}")]
    SigningRejected(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Whether the caller may retry the same operation unchanged.
    ///
    /// Submission is idempotent by content address, so storage and transport
    /// failures are safe to retry. Crypto and format errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DependencyUnavailable(_)
                | Error::AllDialsFailed { .. }
                | Error::Storage(_)
                | Error::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::DependencyUnavailable("bafy".into()).is_retryable());
        assert!(Error::AllDialsFailed { attempts: 3 }.is_retryable());
        assert!(!Error::SignatureVerificationFailed.is_retryable());
        assert!(!Error::InvalidKeyFormat("short".into()).is_retryable());
        assert!(!Error::TimestampOutOfWindow { ts: 1 }.is_retryable());
        assert!(!Error::NoIdentity.is_retryable());
    }

    #[test]
    fn test_no_identity_message_is_bare() {
        // Crosses origin boundaries verbatim; must not grow detail.
        assert_eq!(Error::NoIdentity.to_string(), "NoIdentity");
    }
}
