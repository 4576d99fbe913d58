// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport sessions.
//!
//! A session is one open connection to a device. Protocol crates open them
//! through a [`Connector`], which is the only thing the connection pool knows
//! about. Byte-oriented protocols (Modbus, S7) wrap their socket or serial
//! port in a [`StreamTransport`], which enforces the read deadline on every
//! exchange.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::TransportError;

// =============================================================================
// Connector
// =============================================================================

/// Opens and closes sessions for a pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The session type handed to callers.
    type Session: Send + 'static;

    /// Opens a new session, including any protocol handshake.
    async fn connect(&self) -> Result<Self::Session, TransportError>;

    /// Closes a session. The default drops it, which closes sockets.
    fn close(&self, session: Self::Session) {
        drop(session);
    }

    /// Describes the remote end for logs.
    fn target(&self) -> String;
}

// =============================================================================
// FrameTransport
// =============================================================================

/// A byte stream usable as a session transport.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Request/response exchange over a session.
#[async_trait]
pub trait FrameTransport: Send {
    /// Writes `request`, then reads until at least `min_len` bytes are in
    /// `response`. Returns the number of bytes read.
    async fn send_and_receive(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        min_len: usize,
    ) -> Result<usize, TransportError>;
}

// =============================================================================
// StreamTransport
// =============================================================================

/// A byte stream with a read deadline.
pub struct StreamTransport<S = Box<dyn ByteStream>> {
    stream: S,
    read_timeout: Duration,
    peer: String,
}

impl<S: ByteStream> StreamTransport<S> {
    /// Wraps a connected stream.
    pub fn new(stream: S, read_timeout: Duration, peer: impl Into<String>) -> Self {
        Self {
            stream,
            read_timeout,
            peer: peer.into(),
        }
    }

    /// Returns the remote end description.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Returns the read deadline.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Writes a complete request.
    pub async fn send(&mut self, request: &[u8]) -> Result<(), TransportError> {
        let write = async {
            self.stream.write_all(request).await?;
            self.stream.flush().await
        };
        match timeout(self.read_timeout, write).await {
            Ok(result) => result.map_err(TransportError::Io),
            Err(_) => Err(TransportError::ReadTimeout {
                timeout: self.read_timeout,
            }),
        }
    }

    /// Reads into `buf[filled..]` until at least `min_len` bytes are present.
    ///
    /// Returns the total filled length. The whole call shares one deadline.
    pub async fn receive_at_least(
        &mut self,
        buf: &mut [u8],
        filled: usize,
        min_len: usize,
    ) -> Result<usize, TransportError> {
        if min_len > buf.len() {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("response buffer of {} bytes cannot hold {}", buf.len(), min_len),
            )));
        }

        let stream = &mut self.stream;
        let read = async {
            let mut filled = filled;
            while filled < min_len {
                let n = stream.read(&mut buf[filled..]).await?;
                if n == 0 {
                    return Err(TransportError::Closed);
                }
                filled += n;
            }
            Ok(filled)
        };

        match timeout(self.read_timeout, read).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ReadTimeout {
                timeout: self.read_timeout,
            }),
        }
    }

    /// Consumes the transport and returns the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[async_trait]
impl<S: ByteStream> FrameTransport for StreamTransport<S> {
    async fn send_and_receive(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        min_len: usize,
    ) -> Result<usize, TransportError> {
        self.send(request).await?;
        self.receive_at_least(response, 0, min_len).await
    }
}

impl<S> fmt::Debug for StreamTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("peer", &self.peer)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

// =============================================================================
// TCP helper
// =============================================================================

/// Opens a TCP connection with a deadline and `TCP_NODELAY` set.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let target = format!("{}:{}", host, port);
    let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            target: target.clone(),
            timeout: connect_timeout,
        })?
        .map_err(|e| TransportError::connect(&target, e))?;

    stream.set_nodelay(true).ok();
    Ok(stream)
}

// =============================================================================
// Tests
// =============================================================================
