//! # Transport
//!
//! The device-link handshake needs exactly one thing from the network: a
//! reliable byte stream to a given address, carrying length-prefixed
//! frames, opened under a protocol identifier. That is the [`Transport`] and
//! [`ByteStream`] pair.
//!
//! ```text
//! framed.rs  u32 length-prefixed frames over any AsyncRead + AsyncWrite
//! tcp.rs     TCP dialer and listener for /ip4, /ip6, /dns multiaddrs
//! memory.rs  in-process transport for tests, keyed by multiaddr
//! ```
//!
//! Protocol negotiation is one frame: the dialer writes the protocol id, the
//! listener reads it and drops the stream on mismatch. Timeouts belong to
//! the concrete transport, not to the handshake: the TCP listener hands out
//! unnegotiated streams so a silent peer only stalls its own task.

pub mod framed;
pub mod memory;
pub mod tcp;

use async_trait::async_trait;
use libp2p::Multiaddr;

pub use framed::FramedStream;
pub use memory::{MemoryListener, MemoryTransport};
pub use tcp::{InboundStream, TcpLinkListener, TcpTransport};

/// Errors raised while dialing, negotiating or moving frames.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("unsupported address: {0}")]
    UnsupportedAddress(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("protocol mismatch: expected {expected}, got {got}")]
    ProtocolMismatch { expected: String, got: String },

    #[error("protocol negotiation timed out")]
    NegotiationTimeout,

    #[error("stream closed")]
    Closed,
}

/// A bidirectional stream of frames.
#[async_trait]
pub trait ByteStream: Send {
    async fn write_frame(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Next frame, or `None` once the peer has closed.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    /// Like [`read_frame`](Self::read_frame) but treats closure as an error.
    async fn expect_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        self.read_frame().await?.ok_or(TransportError::Closed)
    }
}

/// Opens streams to remote addresses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial(&self, addr: &Multiaddr, protocol: &str)
        -> Result<Box<dyn ByteStream>, TransportError>;
}

/// Dialer side of protocol negotiation.
pub async fn negotiate_outbound(
    stream: &mut dyn ByteStream,
    protocol: &str,
) -> Result<(), TransportError> {
    stream.write_frame(protocol.as_bytes()).await
}

/// Listener side of protocol negotiation.
pub async fn negotiate_inbound(
    stream: &mut dyn ByteStream,
    protocol: &str,
) -> Result<(), TransportError> {
    let got = stream.expect_frame().await?;
    if got != protocol.as_bytes() {
        return Err(TransportError::ProtocolMismatch {
            expected: protocol.to_string(),
            got: String::from_utf8_lossy(&got).into_owned(),
        });
    }
    Ok(())
}
