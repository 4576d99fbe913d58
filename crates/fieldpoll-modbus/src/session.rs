// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus sessions over TCP and serial lines.
//!
//! A [`ModbusSession`] is one open stream plus the framing it speaks. The
//! [`ModbusConnector`] opens them for the pool:
//!
//! | Model | Stream | Framing |
//! |-------|--------|---------|
//! | modbus-tcp | TCP | MBAP |
//! | modbus-rtu-over-tcp | TCP | RTU |
//! | modbus-rtu | serial port | RTU, with the 3.5 character gap |

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;

use fieldpoll_core::session::{connect_tcp, ByteStream, Connector, StreamTransport};
use fieldpoll_core::{
    DataBits, FetchError, Parity, ProtocolError, SerialSettings, StopBits, TransportError,
};

use crate::frame::{crc16, Framing, MBAP_LEN};

// =============================================================================
// ModbusSession
// =============================================================================

/// One open Modbus stream.
pub struct ModbusSession {
    transport: StreamTransport,
    framing: Framing,
    next_transaction: u16,
    inter_frame_delay: Option<Duration>,
    last_exchange: Option<Instant>,
}

impl ModbusSession {
    /// Wraps a connected stream.
    pub fn new(
        stream: impl ByteStream,
        framing: Framing,
        read_timeout: Duration,
        peer: impl Into<String>,
    ) -> Self {
        let stream: Box<dyn ByteStream> = Box::new(stream);
        Self {
            transport: StreamTransport::new(stream, read_timeout, peer),
            framing,
            next_transaction: 1,
            inter_frame_delay: None,
            last_exchange: None,
        }
    }

    /// Enforces a silent gap between consecutive frames.
    pub fn with_inter_frame_delay(mut self, delay: Duration) -> Self {
        self.inter_frame_delay = Some(delay);
        self
    }

    /// Returns the framing.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Sends a complete request ADU and reads one response.
    ///
    /// TCP requests get a fresh transaction id written into their header.
    /// Returns the position of the response PDU (function code first) in
    /// `response`, which must hold the largest reply the request can draw.
    pub async fn exchange(
        &mut self,
        request: &mut [u8],
        response: &mut [u8],
    ) -> Result<Range<usize>, FetchError> {
        // the session is not Sync: no borrow of it may live across the sleep
        let deadline = self.next_send_at();
        if let Some(at) = deadline {
            tokio::time::sleep_until(at).await;
        }
        let result = match self.framing {
            Framing::Tcp => self.exchange_tcp(request, response).await,
            Framing::Rtu => self.exchange_rtu(request, response).await,
        };
        self.last_exchange = Some(Instant::now());
        result
    }

    /// Earliest instant the next request may go out, if paced.
    fn next_send_at(&self) -> Option<Instant> {
        self.inter_frame_delay
            .zip(self.last_exchange)
            .map(|(delay, last)| last + delay)
    }

    async fn exchange_tcp(
        &mut self,
        request: &mut [u8],
        response: &mut [u8],
    ) -> Result<Range<usize>, FetchError> {
        if request.len() < MBAP_LEN + 1 {
            return Err(ProtocolError::malformed("request shorter than an MBAP frame").into());
        }
        let transaction = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1);
        request[..2].copy_from_slice(&transaction.to_be_bytes());

        tracing::trace!(peer = %self.transport.peer(), transaction, request = ?request, "Modbus TCP send");
        self.transport.send(request).await?;

        let filled = self.transport.receive_at_least(response, 0, MBAP_LEN).await?;
        let length = u16::from_be_bytes([response[4], response[5]]) as usize;
        if length < 2 {
            return Err(ProtocolError::malformed(format!("MBAP length {} is too small", length)).into());
        }
        let total = 6 + length;
        if total > response.len() {
            return Err(ProtocolError::malformed(format!(
                "response of {} bytes exceeds the {} expected",
                total,
                response.len()
            ))
            .into());
        }
        self.transport.receive_at_least(response, filled, total).await?;
        tracing::trace!(peer = %self.transport.peer(), response = ?&response[..total], "Modbus TCP receive");

        let actual = u16::from_be_bytes([response[0], response[1]]);
        if actual != transaction {
            return Err(ProtocolError::TransactionMismatch {
                expected: transaction,
                actual,
            }
            .into());
        }
        if response[2] != 0 || response[3] != 0 {
            return Err(ProtocolError::malformed("protocol identifier is not Modbus").into());
        }
        if response[6] != request[6] {
            return Err(ProtocolError::UnitMismatch {
                expected: request[6],
                actual: response[6],
            }
            .into());
        }
        Ok(MBAP_LEN..total)
    }

    async fn exchange_rtu(
        &mut self,
        request: &mut [u8],
        response: &mut [u8],
    ) -> Result<Range<usize>, FetchError> {
        if request.len() < 4 {
            return Err(ProtocolError::malformed("request shorter than an RTU frame").into());
        }
        tracing::trace!(peer = %self.transport.peer(), request = ?request, "Modbus RTU send");
        self.transport.send(request).await?;

        let filled = self.transport.receive_at_least(response, 0, 3).await?;
        let function = response[1];
        let total = if function & 0x80 != 0 {
            5
        } else {
            match function {
                0x01..=0x04 => 5 + response[2] as usize,
                _ => 8,
            }
        };
        if total > response.len() {
            return Err(ProtocolError::malformed(format!(
                "response of {} bytes exceeds the {} expected",
                total,
                response.len()
            ))
            .into());
        }
        self.transport.receive_at_least(response, filled, total).await?;
        tracing::trace!(peer = %self.transport.peer(), response = ?&response[..total], "Modbus RTU receive");

        let expected = crc16(&response[..total - 2]);
        let actual = u16::from_le_bytes([response[total - 2], response[total - 1]]);
        if expected != actual {
            return Err(ProtocolError::Checksum { expected, actual }.into());
        }
        if response[0] != request[0] {
            return Err(ProtocolError::UnitMismatch {
                expected: request[0],
                actual: response[0],
            }
            .into());
        }
        Ok(1..total - 2)
    }
}

impl std::fmt::Debug for ModbusSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusSession")
            .field("peer", &self.transport.peer())
            .field("framing", &self.framing)
            .finish()
    }
}

// =============================================================================
// ModbusConnector
// =============================================================================

/// Where sessions are opened.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// TCP host and port.
    Tcp {
        /// Host name or IP.
        host: String,
        /// Port.
        port: u16,
    },
    /// Local serial port.
    Serial(SerialSettings),
}

/// Opens Modbus sessions for the pool.
#[derive(Debug, Clone)]
pub struct ModbusConnector {
    endpoint: Endpoint,
    framing: Framing,
    timeout: Duration,
}

impl ModbusConnector {
    /// Creates a connector.
    pub fn new(endpoint: Endpoint, framing: Framing, timeout: Duration) -> Self {
        Self {
            endpoint,
            framing,
            timeout,
        }
    }

    fn open_serial(&self, settings: &SerialSettings) -> Result<ModbusSession, TransportError> {
        let port = tokio_serial::new(&settings.path, settings.baud_rate)
            .data_bits(match settings.data_bits {
                DataBits::Seven => tokio_serial::DataBits::Seven,
                DataBits::Eight => tokio_serial::DataBits::Eight,
            })
            .parity(match settings.parity {
                Parity::None => tokio_serial::Parity::None,
                Parity::Odd => tokio_serial::Parity::Odd,
                Parity::Even => tokio_serial::Parity::Even,
            })
            .stop_bits(match settings.stop_bits {
                StopBits::One => tokio_serial::StopBits::One,
                StopBits::Two => tokio_serial::StopBits::Two,
            })
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| TransportError::connect(&settings.path, std::io::Error::from(e)))?;

        Ok(
            ModbusSession::new(port, Framing::Rtu, self.timeout, settings.path.clone())
                .with_inter_frame_delay(settings.inter_frame_delay()),
        )
    }
}

#[async_trait]
impl Connector for ModbusConnector {
    type Session = ModbusSession;

    async fn connect(&self) -> Result<ModbusSession, TransportError> {
        let session = match &self.endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = connect_tcp(host, *port, self.timeout).await?;
                ModbusSession::new(stream, self.framing, self.timeout, format!("{}:{}", host, port))
            }
            Endpoint::Serial(settings) => self.open_serial(settings)?,
        };

        tracing::info!(target = %self.target(), framing = ?self.framing, "Connected to Modbus device");
        Ok(session)
    }

    fn close(&self, session: ModbusSession) {
        tracing::info!(target = %self.target(), "Closing Modbus session");
        drop(session);
    }

    fn target(&self) -> String {
        match &self.endpoint {
            Endpoint::Tcp { host, port } => format!("{}:{}", host, port),
            Endpoint::Serial(settings) => settings.path.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{read_pdu, MAX_ADU_LEN};
    use crate::types::RegisterType;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_exchange_stamps_transaction() {
        let (client, mut server) = duplex(512);
        let mut session = ModbusSession::new(client, Framing::Tcp, Duration::from_secs(1), "duplex");

        let server = tokio::spawn(async move {
            let mut req = [0u8; 12];
            server.read_exact(&mut req).await.unwrap();
            assert_eq!(&req[..2], &[0, 1]);
            let reply = [req[0], req[1], 0, 0, 0, 5, 1, 0x03, 0x02, 0x12, 0x34];
            server.write_all(&reply).await.unwrap();
            server
        });

        let mut request = Framing::Tcp.wrap(1, &read_pdu(RegisterType::HoldingRegister, 0, 1));
        let mut response = [0u8; MAX_ADU_LEN];
        let range = session.exchange(&mut request, &mut response).await.unwrap();
        assert_eq!(&response[range], &[0x03, 0x02, 0x12, 0x34]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_transaction_mismatch() {
        let (client, mut server) = duplex(512);
        let mut session = ModbusSession::new(client, Framing::Tcp, Duration::from_secs(1), "duplex");

        tokio::spawn(async move {
            let mut req = [0u8; 12];
            server.read_exact(&mut req).await.unwrap();
            let reply = [0x00, 0x09, 0, 0, 0, 5, 1, 0x03, 0x02, 0x12, 0x34];
            server.write_all(&reply).await.unwrap();
            let _ = server.read(&mut req).await;
        });

        let mut request = Framing::Tcp.wrap(1, &read_pdu(RegisterType::HoldingRegister, 0, 1));
        let mut response = [0u8; MAX_ADU_LEN];
        let err = session.exchange(&mut request, &mut response).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Protocol(ProtocolError::TransactionMismatch {
                expected: 1,
                actual: 9
            })
        ));
    }

    #[tokio::test]
    async fn test_tcp_unit_mismatch() {
        let (client, mut server) = duplex(512);
        let mut session = ModbusSession::new(client, Framing::Tcp, Duration::from_secs(1), "duplex");

        tokio::spawn(async move {
            let mut req = [0u8; 12];
            server.read_exact(&mut req).await.unwrap();
            let reply = [req[0], req[1], 0, 0, 0, 5, 7, 0x03, 0x02, 0x12, 0x34];
            server.write_all(&reply).await.unwrap();
            let _ = server.read(&mut req).await;
        });

        let mut request = Framing::Tcp.wrap(1, &read_pdu(RegisterType::HoldingRegister, 0, 1));
        let mut response = [0u8; MAX_ADU_LEN];
        let err = session.exchange(&mut request, &mut response).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Protocol(ProtocolError::UnitMismatch {
                expected: 1,
                actual: 7
            })
        ));
    }

    #[tokio::test]
    async fn test_rtu_exchange_checks_crc() {
        let (client, mut server) = duplex(512);
        let mut session = ModbusSession::new(client, Framing::Rtu, Duration::from_secs(1), "duplex");

        tokio::spawn(async move {
            let mut req = [0u8; 8];
            server.read_exact(&mut req).await.unwrap();
            server
                .write_all(&[0x2A, 0x03, 0x06, 0x12, 0x34, 0x56, 0x78, 0x23, 0x45, 0x30, 0x60])
                .await
                .unwrap();

            server.read_exact(&mut req).await.unwrap();
            server
                .write_all(&[0x2A, 0x03, 0x06, 0x12, 0x34, 0x56, 0x78, 0x23, 0x45, 0x00, 0x00])
                .await
                .unwrap();
            let _ = server.read(&mut req).await;
        });

        let mut request = Framing::Rtu.wrap(0x2A, &read_pdu(RegisterType::HoldingRegister, 0x10, 3));
        let mut response = [0u8; MAX_ADU_LEN];
        let range = session.exchange(&mut request, &mut response).await.unwrap();
        assert_eq!(&response[range], &[0x03, 0x06, 0x12, 0x34, 0x56, 0x78, 0x23, 0x45]);

        let err = session.exchange(&mut request, &mut response).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Protocol(ProtocolError::Checksum { actual: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_rtu_exception_frame_length() {
        let (client, mut server) = duplex(512);
        let mut session = ModbusSession::new(client, Framing::Rtu, Duration::from_secs(1), "duplex");

        tokio::spawn(async move {
            let mut req = [0u8; 8];
            server.read_exact(&mut req).await.unwrap();
            let mut reply = vec![0x01, 0x83, 0x02];
            let crc = crc16(&reply);
            reply.extend_from_slice(&crc.to_le_bytes());
            server.write_all(&reply).await.unwrap();
            let _ = server.read(&mut req).await;
        });

        let mut request = Framing::Rtu.wrap(1, &read_pdu(RegisterType::HoldingRegister, 0, 1));
        let mut response = [0u8; 7];
        let range = session.exchange(&mut request, &mut response).await.unwrap();
        assert_eq!(&response[range], &[0x83, 0x02]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_frame_delay_spaces_requests() {
        let (client, mut server) = duplex(512);
        let mut session = ModbusSession::new(client, Framing::Rtu, Duration::from_secs(1), "duplex")
            .with_inter_frame_delay(Duration::from_millis(4));

        let server = tokio::spawn(async move {
            let mut arrivals = Vec::new();
            for _ in 0..2 {
                let mut req = [0u8; 8];
                server.read_exact(&mut req).await.unwrap();
                arrivals.push(Instant::now());
                let mut reply = vec![0x01, 0x03, 0x02, 0x00, 0x01];
                let crc = crc16(&reply);
                reply.extend_from_slice(&crc.to_le_bytes());
                server.write_all(&reply).await.unwrap();
            }
            arrivals
        });

        let mut request = Framing::Rtu.wrap(1, &read_pdu(RegisterType::HoldingRegister, 0, 1));
        let mut response = [0u8; 7];
        session.exchange(&mut request, &mut response).await.unwrap();
        session.exchange(&mut request, &mut response).await.unwrap();

        let arrivals = server.await.unwrap();
        assert!(arrivals[1] - arrivals[0] >= Duration::from_millis(4));
    }

    fn require_send<F: std::future::Future + Send>(future: F) -> F {
        future
    }

    #[tokio::test]
    async fn test_paced_exchange_is_send() {
        let (client, mut server) = duplex(512);
        let mut session = ModbusSession::new(client, Framing::Rtu, Duration::from_secs(1), "duplex")
            .with_inter_frame_delay(Duration::from_millis(4));
        session.last_exchange = Some(Instant::now());
        assert!(session.next_send_at().is_some());

        let responder = tokio::spawn(async move {
            let mut req = [0u8; 8];
            server.read_exact(&mut req).await.unwrap();
            let mut reply = vec![0x01, 0x03, 0x02, 0x00, 0x2A];
            let crc = crc16(&reply);
            reply.extend_from_slice(&crc.to_le_bytes());
            server.write_all(&reply).await.unwrap();
        });

        // spawning needs the paced exchange future to be Send
        let handle = tokio::spawn(async move {
            let mut request = Framing::Rtu.wrap(1, &read_pdu(RegisterType::HoldingRegister, 0, 1));
            let mut response = [0u8; 7];
            let pdu = require_send(session.exchange(&mut request, &mut response))
                .await
                .unwrap();
            response[pdu].to_vec()
        });

        assert_eq!(handle.await.unwrap(), vec![0x03, 0x02, 0x00, 0x2A]);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_connector_refused_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = ModbusConnector::new(
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            Framing::Tcp,
            Duration::from_secs(1),
        );
        assert_eq!(connector.target(), format!("127.0.0.1:{}", port));
        assert!(matches!(
            connector.connect().await,
            Err(TransportError::Connect { .. })
        ));
    }
}
