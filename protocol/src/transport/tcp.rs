//! TCP transport for `/ip4/.../tcp/N`, `/ip6/.../tcp/N` and
//! `/dns*/.../tcp/N` multiaddrs. A trailing `/p2p/<peer>` component is
//! accepted and ignored.

use async_trait::async_trait;
use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::debug;

use super::{negotiate_inbound, negotiate_outbound, ByteStream, FramedStream, Transport, TransportError};
use crate::config::{LINK_NEGOTIATION_TIMEOUT, MAX_FRAME_LENGTH};

enum Host {
    Ip(IpAddr),
    Dns(String),
}

fn host_and_port(addr: &Multiaddr) -> Result<(Host, u16), TransportError> {
    let mut host = None;
    let mut port = None;
    for component in addr.iter() {
        match component {
            Protocol::Ip4(ip) => host = Some(Host::Ip(IpAddr::V4(ip))),
            Protocol::Ip6(ip) => host = Some(Host::Ip(IpAddr::V6(ip))),
            Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name) => {
                host = Some(Host::Dns(name.to_string()))
            }
            Protocol::Tcp(p) => port = Some(p),
            Protocol::P2p(_) => {}
            _ => return Err(TransportError::UnsupportedAddress(addr.to_string())),
        }
    }
    match (host, port) {
        (Some(h), Some(p)) => Ok((h, p)),
        _ => Err(TransportError::UnsupportedAddress(addr.to_string())),
    }
}

/// Dials TCP multiaddrs.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    max_frame: usize,
}

impl TcpTransport {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(MAX_FRAME_LENGTH)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(
        &self,
        addr: &Multiaddr,
        protocol: &str,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        let stream = match host_and_port(addr)? {
            (Host::Ip(ip), port) => TcpStream::connect(SocketAddr::new(ip, port)).await?,
            (Host::Dns(name), port) => TcpStream::connect((name.as_str(), port)).await?,
        };
        stream.set_nodelay(true)?;
        let mut framed = FramedStream::new(stream, self.max_frame);
        negotiate_outbound(&mut framed, protocol).await?;
        debug!(%addr, protocol, "tcp stream open");
        Ok(Box::new(framed))
    }
}

/// Accepts TCP connections that negotiate one protocol.
pub struct TcpLinkListener {
    listener: TcpListener,
    protocol: String,
    max_frame: usize,
}

impl TcpLinkListener {
    pub async fn bind(addr: SocketAddr, protocol: &str, max_frame: usize) -> Result<Self, TransportError> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
            protocol: protocol.to_string(),
            max_frame,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// The bound address as a multiaddr, for advertising in a link session.
    pub fn local_multiaddr(&self) -> Result<Multiaddr, TransportError> {
        let addr = self.local_addr()?;
        let mut ma = Multiaddr::empty();
        match addr.ip() {
            IpAddr::V4(ip) => ma.push(Protocol::Ip4(ip)),
            IpAddr::V6(ip) => ma.push(Protocol::Ip6(ip)),
        }
        ma.push(Protocol::Tcp(addr.port()));
        Ok(ma)
    }

    /// Accept the next connection. Negotiation is left to the returned
    /// [`InboundStream`] so a peer that never speaks cannot hold up the
    /// accept loop.
    pub async fn accept(&self) -> Result<(InboundStream, SocketAddr), TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((
            InboundStream {
                framed: FramedStream::new(stream, self.max_frame),
                protocol: self.protocol.clone(),
            },
            peer,
        ))
    }
}

/// An accepted TCP connection that has not named its protocol yet.
pub struct InboundStream {
    framed: FramedStream<TcpStream>,
    protocol: String,
}

impl InboundStream {
    /// Read the protocol id within `deadline`. Connections that speak
    /// something else are returned as errors so the caller can log them.
    pub async fn negotiate(mut self, deadline: Duration) -> Result<FramedStream<TcpStream>, TransportError> {
        let negotiated = timeout(deadline, negotiate_inbound(&mut self.framed, &self.protocol)).await;
        match negotiated {
            Ok(Ok(())) => Ok(self.framed),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::NegotiationTimeout),
        }
    }
}
