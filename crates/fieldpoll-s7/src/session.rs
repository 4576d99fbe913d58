// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! S7 sessions.
//!
//! Opening a session takes two round trips before any data moves:
//!
//! ```text
//! client                         PLC
//!   │── COTP connection request ──►│   local TSAP 0x0100, remote TSAP from rack/slot
//!   │◄── connection confirm (D0) ──│
//!   │── setup communication ──────►│   asks for a 480-byte PDU
//!   │◄── negotiated PDU size ──────│   cached for the session lifetime
//! ```
//!
//! Reads and writes larger than the negotiated PDU allows are split into
//! several jobs.

use std::time::Duration;

use async_trait::async_trait;

use fieldpoll_core::session::{connect_tcp, ByteStream, Connector, StreamTransport};
use fieldpoll_core::{FetchError, ProtocolError, TransportError};

use crate::address::Area;
use crate::protocol::{
    check_write, connect_request, read_data, read_request, setup_request, telegram_len,
    write_request, WriteTarget, COTP_CONNECT_CONFIRM, PDU_SIZE_REQUEST, READ_OVERHEAD,
    SETUP_RESPONSE_LEN, S7_ID, TPKT_ISO_LEN, TPKT_VERSION, WRITE_OVERHEAD,
};

// =============================================================================
// S7Session
// =============================================================================

/// An open, negotiated S7 connection.
pub struct S7Session {
    transport: StreamTransport,
    pdu_length: u16,
    next_ref: u16,
    buffer: Vec<u8>,
}

impl S7Session {
    /// Runs the COTP and setup-communication handshake over `stream`.
    pub async fn handshake(
        stream: impl ByteStream,
        read_timeout: Duration,
        peer: impl Into<String>,
        local_tsap: u16,
        remote_tsap: u16,
    ) -> Result<Self, TransportError> {
        let stream: Box<dyn ByteStream> = Box::new(stream);
        let mut session = Self {
            transport: StreamTransport::new(stream, read_timeout, peer),
            pdu_length: 0,
            next_ref: 1,
            buffer: vec![0; TPKT_ISO_LEN + PDU_SIZE_REQUEST as usize],
        };
        session.connect_cotp(local_tsap, remote_tsap).await?;
        session.negotiate().await?;
        Ok(session)
    }

    async fn connect_cotp(&mut self, local_tsap: u16, remote_tsap: u16) -> Result<(), TransportError> {
        self.transport.send(&connect_request(local_tsap, remote_tsap)).await?;

        let filled = self.transport.receive_at_least(&mut self.buffer, 0, 4).await?;
        let len = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
        if self.buffer[0] != TPKT_VERSION || len < 7 || len > self.buffer.len() {
            return Err(TransportError::handshake("invalid connection confirm"));
        }
        self.transport.receive_at_least(&mut self.buffer, filled, len).await?;
        if self.buffer[5] != COTP_CONNECT_CONFIRM {
            return Err(TransportError::handshake(format!(
                "connection refused (TPDU {:#04x}) for remote TSAP {:#06x}",
                self.buffer[5], remote_tsap
            )));
        }
        Ok(())
    }

    async fn negotiate(&mut self) -> Result<(), TransportError> {
        let pdu_ref = self.next_ref();
        self.transport.send(&setup_request(pdu_ref)).await?;
        let total = match self.receive().await {
            Ok(total) => total,
            Err(FetchError::Transport(e)) => return Err(e),
            Err(e) => return Err(TransportError::handshake(e.to_string())),
        };

        let reply = &self.buffer[..total];
        if total < SETUP_RESPONSE_LEN || reply[7] != S7_ID || reply[17] != 0 || reply[18] != 0 {
            return Err(TransportError::handshake("PDU negotiation failed"));
        }
        let pdu = u16::from_be_bytes([reply[25], reply[26]]);
        if pdu <= WRITE_OVERHEAD {
            return Err(TransportError::handshake(format!(
                "negotiated PDU of {} bytes is unusable",
                pdu
            )));
        }
        self.pdu_length = pdu;
        if self.buffer.len() < TPKT_ISO_LEN + pdu as usize {
            self.buffer.resize(TPKT_ISO_LEN + pdu as usize, 0);
        }
        tracing::debug!(peer = %self.transport.peer(), pdu, "S7 PDU negotiated");
        Ok(())
    }

    /// Negotiated PDU size.
    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    /// Largest payload of one read job.
    pub fn max_read(&self) -> usize {
        self.pdu_length.saturating_sub(READ_OVERHEAD).max(1) as usize
    }

    /// Largest payload of one write job.
    pub fn max_write(&self) -> usize {
        self.pdu_length.saturating_sub(WRITE_OVERHEAD).max(1) as usize
    }

    fn next_ref(&mut self) -> u16 {
        let pdu_ref = self.next_ref;
        self.next_ref = self.next_ref.wrapping_add(1).max(1);
        pdu_ref
    }

    /// Reads one telegram into the buffer and returns its length.
    async fn receive(&mut self) -> Result<usize, FetchError> {
        let filled = self
            .transport
            .receive_at_least(&mut self.buffer, 0, TPKT_ISO_LEN)
            .await?;
        let total = telegram_len(&self.buffer[..TPKT_ISO_LEN])?;
        if total > self.buffer.len() {
            return Err(ProtocolError::malformed(format!(
                "telegram of {} bytes exceeds the negotiated PDU",
                total
            ))
            .into());
        }
        self.transport
            .receive_at_least(&mut self.buffer, filled, total)
            .await?;
        tracing::trace!(peer = %self.transport.peer(), telegram = ?&self.buffer[..total], "S7 receive");
        Ok(total)
    }

    /// Reads `out.len()` bytes of `area` from byte `start`.
    pub async fn read_area(&mut self, area: Area, start: u32, out: &mut [u8]) -> Result<(), FetchError> {
        let chunk = self.max_read();
        let mut offset = 0;
        while offset < out.len() {
            let len = (out.len() - offset).min(chunk);
            let pdu_ref = self.next_ref();
            let request = read_request(pdu_ref, area.code(), area.db(), start + offset as u32, len as u16);
            tracing::trace!(peer = %self.transport.peer(), request = ?request, "S7 send");
            self.transport.send(&request).await?;

            let total = self.receive().await?;
            let data = read_data(&self.buffer[..total], pdu_ref, len)?;
            out[offset..offset + len].copy_from_slice(data);
            offset += len;
        }
        Ok(())
    }

    /// Writes `data` to `area`.
    ///
    /// A bit target writes only the first byte's truth value.
    pub async fn write_area(&mut self, area: Area, target: WriteTarget, data: &[u8]) -> Result<(), FetchError> {
        match target {
            WriteTarget::Bit { .. } => {
                let bit = data.get(..1).unwrap_or(&[0]);
                self.write_job(area, target, bit).await
            }
            WriteTarget::Bytes { byte } => {
                let chunk = self.max_write();
                for (i, part) in data.chunks(chunk).enumerate() {
                    let target = WriteTarget::Bytes {
                        byte: byte + (i * chunk) as u32,
                    };
                    self.write_job(area, target, part).await?;
                }
                Ok(())
            }
        }
    }

    async fn write_job(&mut self, area: Area, target: WriteTarget, data: &[u8]) -> Result<(), FetchError> {
        let pdu_ref = self.next_ref();
        let request = write_request(pdu_ref, area.code(), area.db(), target, data);
        tracing::trace!(peer = %self.transport.peer(), request = ?request, "S7 send");
        self.transport.send(&request).await?;
        let total = self.receive().await?;
        check_write(&self.buffer[..total], pdu_ref)?;
        Ok(())
    }
}

impl std::fmt::Debug for S7Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S7Session")
            .field("peer", &self.transport.peer())
            .field("pdu_length", &self.pdu_length)
            .finish()
    }
}

// =============================================================================
// S7Connector
// =============================================================================

/// Opens negotiated S7 sessions.
#[derive(Debug, Clone)]
pub struct S7Connector {
    host: String,
    port: u16,
    local_tsap: u16,
    remote_tsap: u16,
    timeout: Duration,
}

impl S7Connector {
    /// Creates a connector.
    pub fn new(host: impl Into<String>, port: u16, local_tsap: u16, remote_tsap: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            local_tsap,
            remote_tsap,
            timeout,
        }
    }
}

#[async_trait]
impl Connector for S7Connector {
    type Session = S7Session;

    async fn connect(&self) -> Result<S7Session, TransportError> {
        let stream = connect_tcp(&self.host, self.port, self.timeout).await?;
        let session = S7Session::handshake(
            stream,
            self.timeout,
            self.target(),
            self.local_tsap,
            self.remote_tsap,
        )
        .await?;
        tracing::info!(
            host = %self.host,
            port = self.port,
            remote_tsap = self.remote_tsap,
            pdu = session.pdu_length(),
            "Connected to S7 PLC"
        );
        Ok(session)
    }

    fn close(&self, session: S7Session) {
        tracing::info!(host = %self.host, port = self.port, "Closing S7 session");
        drop(session);
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Tests
// =============================================================================
