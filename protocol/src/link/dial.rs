//! Joiner-side address selection and dialing.

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::{ByteStream, Transport};

/// One step of connecting to an Initiator, for progress display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LinkEvent {
    Dialing { addr: String },
    DialOk { addr: String },
    DialFail { addr: String, error: String },
}

/// Reachable without a relay over plain TCP, the one stream transport the
/// Joiner dials. Relayed, QUIC and websocket addresses are skipped.
pub fn is_directly_dialable(addr: &Multiaddr) -> bool {
    let mut tcp = false;
    for component in addr.iter() {
        match component {
            Protocol::Tcp(_) => tcp = true,
            Protocol::Ip4(_)
            | Protocol::Ip6(_)
            | Protocol::Dns(_)
            | Protocol::Dns4(_)
            | Protocol::Dns6(_)
            | Protocol::P2p(_) => {}
            _ => return false,
        }
    }
    tcp
}

pub fn is_loopback(addr: &Multiaddr) -> bool {
    match addr.iter().next() {
        Some(Protocol::Ip4(ip)) => ip.is_loopback(),
        Some(Protocol::Ip6(ip)) => ip.is_loopback(),
        Some(Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name)) => name == "localhost",
        _ => false,
    }
}

/// Directly dialable addresses, loopback ones first, otherwise in the
/// order advertised.
pub fn select_candidates(addrs: &[Multiaddr]) -> Vec<Multiaddr> {
    let (mut loopback, rest): (Vec<_>, Vec<_>) = addrs
        .iter()
        .filter(|addr| is_directly_dialable(addr))
        .cloned()
        .partition(is_loopback);
    loopback.extend(rest);
    loopback
}

fn emit(events: Option<&mpsc::UnboundedSender<LinkEvent>>, event: LinkEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Try each candidate in order and return the first stream that opens.
pub async fn dial_candidates(
    transport: &dyn Transport,
    candidates: &[Multiaddr],
    protocol: &str,
    events: Option<&mpsc::UnboundedSender<LinkEvent>>,
) -> Result<Box<dyn ByteStream>> {
    for addr in candidates {
        debug!(%addr, "dialing");
        emit(events, LinkEvent::Dialing { addr: addr.to_string() });
        match transport.dial(addr, protocol).await {
            Ok(stream) => {
                info!(%addr, "dial ok");
                emit(events, LinkEvent::DialOk { addr: addr.to_string() });
                return Ok(stream);
            }
            Err(e) => {
                warn!(%addr, error = %e, "dial failed");
                emit(
                    events,
                    LinkEvent::DialFail {
                        addr: addr.to_string(),
                        error: e.to_string(),
                    },
                );
            }
        }
    }
    Err(Error::AllDialsFailed {
        attempts: candidates.len(),
    })
}
