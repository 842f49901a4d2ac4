//! In-process transport. Listeners register under a multiaddr; dialing an
//! address nobody listens on is refused, which is how tests simulate
//! unreachable candidates.

use async_trait::async_trait;
use dashmap::DashMap;
use libp2p::Multiaddr;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use super::{negotiate_inbound, negotiate_outbound, ByteStream, FramedStream, Transport, TransportError};
use crate::config::MAX_FRAME_LENGTH;

const DUPLEX_BUFFER: usize = 64 * 1024;

#[derive(Clone, Default)]
pub struct MemoryTransport {
    listeners: Arc<DashMap<Multiaddr, mpsc::Sender<FramedStream<DuplexStream>>>>,
}

/// Receives streams dialed to one address.
pub struct MemoryListener {
    rx: mpsc::Receiver<FramedStream<DuplexStream>>,
    protocol: String,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start listening on `addr` for streams negotiating `protocol`.
    pub fn listen(&self, addr: Multiaddr, protocol: &str) -> MemoryListener {
        let (tx, rx) = mpsc::channel(8);
        self.listeners.insert(addr, tx);
        MemoryListener {
            rx,
            protocol: protocol.to_string(),
        }
    }

    pub fn unlisten(&self, addr: &Multiaddr) {
        self.listeners.remove(addr);
    }
}

impl MemoryListener {
    /// Next negotiated stream, or `None` once the transport is dropped.
    pub async fn accept(&mut self) -> Option<Result<FramedStream<DuplexStream>, TransportError>> {
        let mut stream = self.rx.recv().await?;
        Some(
            negotiate_inbound(&mut stream, &self.protocol)
                .await
                .map(|_| stream),
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dial(
        &self,
        addr: &Multiaddr,
        protocol: &str,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        let tx = self
            .listeners
            .get(addr)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::ConnectionRefused(addr.to_string()))?;

        let (client, server) = tokio::io::duplex(DUPLEX_BUFFER);
        tx.send(FramedStream::new(server, MAX_FRAME_LENGTH))
            .await
            .map_err(|_| TransportError::ConnectionRefused(addr.to_string()))?;

        let mut stream = FramedStream::new(client, MAX_FRAME_LENGTH);
        negotiate_outbound(&mut stream, protocol).await?;
        Ok(Box::new(stream))
    }
}
