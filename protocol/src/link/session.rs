//! Device-link sessions: the out-of-band code an Initiator hands to a
//! Joiner, and the Initiator's record of the one session it will redeem.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use libp2p::Multiaddr;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::{BASE64_MULTIBASE_PREFIX, LINK_TOKEN_BYTES};
use crate::error::{Error, Result};
use crate::identity::principal::Principal;

/// Where the Initiator can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddrInfo {
    pub peer_id: String,
    pub addrs: Vec<String>,
}

/// Everything a Joiner needs to link, usually shown as a QR code or a
/// copyable string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLinkSession {
    pub account_id: String,
    pub secret_token: String,
    pub addr_info: AddrInfo,
}

impl DeviceLinkSession {
    /// The Initiator's account.
    pub fn initiator(&self) -> Result<Principal> {
        self.account_id.parse()
    }

    /// Advertised addresses that parse as multiaddrs. Garbage entries are
    /// skipped; an Initiator may advertise transports we do not know.
    pub fn multiaddrs(&self) -> Vec<Multiaddr> {
        self.addr_info
            .addrs
            .iter()
            .filter_map(|addr| match addr.parse::<Multiaddr>() {
                Ok(ma) => Some(ma),
                Err(e) => {
                    warn!(%addr, error = %e, "skipping unparsable address");
                    None
                }
            })
            .collect()
    }
}

/// Fresh secret token: 16 random bytes, multibase base64 (`m` prefix).
pub fn generate_secret_token() -> String {
    let mut raw = [0u8; LINK_TOKEN_BYTES];
    OsRng.fill_bytes(&mut raw);
    format!("{BASE64_MULTIBASE_PREFIX}{}", STANDARD_NO_PAD.encode(raw))
}

/// What the Initiator knows about the session it created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSessionStatus {
    pub account_id: String,
    pub label: Option<String>,
    pub expires_at: u64,
    pub redeemed_at: Option<u64>,
}

#[derive(Debug, Clone)]
pub(crate) struct ActiveSession {
    pub secret: String,
    pub account: Principal,
    pub label: Option<String>,
    pub expires_at: u64,
    pub redeemed_at: Option<u64>,
}

impl ActiveSession {
    /// Consume the session if `token` is its secret, it has not expired and
    /// it was never redeemed.
    pub fn redeem(&mut self, token: &[u8], now_ms: u64) -> Result<()> {
        let secret = self.secret.as_bytes();
        if token.len() != secret.len() || !bool::from(token.ct_eq(secret)) {
            return Err(Error::TokenRejected);
        }
        if now_ms > self.expires_at {
            return Err(Error::SessionExpired);
        }
        if self.redeemed_at.is_some() {
            return Err(Error::TokenRejected);
        }
        self.redeemed_at = Some(now_ms);
        Ok(())
    }

    pub fn status(&self) -> LinkSessionStatus {
        LinkSessionStatus {
            account_id: self.account.to_string(),
            label: self.label.clone(),
            expires_at: self.expires_at,
            redeemed_at: self.redeemed_at,
        }
    }
}
