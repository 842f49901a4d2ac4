//! Length-prefixed framing over any tokio byte stream.
//!
//! ```text
//!   | len: u32 big-endian | payload (len bytes) |
//! ```
//!
//! A clean EOF at a frame boundary is a closed stream (`Ok(None)`); EOF in
//! the middle of a frame is an error.

use async_trait::async_trait;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{ByteStream, TransportError};

pub struct FramedStream<S> {
    io: S,
    max_frame: usize,
}

impl<S> FramedStream<S> {
    pub fn new(io: S, max_frame: usize) -> Self {
        Self { io, max_frame }
    }

    pub fn into_inner(self) -> S {
        self.io
    }
}

#[async_trait]
impl<S> ByteStream for FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > self.max_frame {
            return Err(TransportError::FrameTooLarge {
                len: data.len(),
                max: self.max_frame,
            });
        }
        let len = data.len() as u32;
        self.io.write_all(&len.to_be_bytes()).await?;
        self.io.write_all(data).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut len_bytes = [0u8; 4];
        match self.io.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > self.max_frame {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }
        let mut data = vec![0u8; len];
        self.io.read_exact(&mut data).await?;
        Ok(Some(data))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.io.shutdown().await {
            Ok(()) => Ok(()),
            // Peer already gone; closing is still done.
            Err(e) if e.kind() == ErrorKind::NotConnected || e.kind() == ErrorKind::BrokenPipe => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
