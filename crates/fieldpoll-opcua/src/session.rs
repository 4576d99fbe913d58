// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC-UA sessions.
//!
//! The `opcua` client is synchronous. Every call runs on the blocking
//! thread pool and is raced against the device timeout; a call that loses
//! the race keeps running in the background while the engine moves on.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opcua::client::prelude::{
    AttributeService, ClientBuilder, IdentityToken, MessageSecurityMode, SecurityPolicy,
    Session as UaSession, UserTokenPolicy,
};
use opcua::sync::RwLock;
use opcua::types::{DataValue, ReadValueId, StatusCode, TimestampsToReturn, WriteValue};

use fieldpoll_core::{Connector, FetchError, ProtocolError, TransportError};

const APPLICATION_NAME: &str = "fieldpoll";
const APPLICATION_URI: &str = "urn:fieldpoll:client";

/// Status codes after which the session is unusable.
const SESSION_LOST: [StatusCode; 8] = [
    StatusCode::BadTimeout,
    StatusCode::BadConnectionClosed,
    StatusCode::BadNotConnected,
    StatusCode::BadSessionClosed,
    StatusCode::BadSessionIdInvalid,
    StatusCode::BadSecureChannelClosed,
    StatusCode::BadCommunicationError,
    StatusCode::BadServerNotConnected,
];

/// Maps a failed service call to a fetch error.
///
/// Lost sessions are transport failures; anything else is the server's
/// answer to the request.
pub fn service_error(status: StatusCode) -> FetchError {
    if SESSION_LOST.contains(&status) {
        TransportError::Io(io::Error::new(io::ErrorKind::ConnectionAborted, status.to_string())).into()
    } else {
        ProtocolError::Status {
            code: status.bits(),
            description: status.to_string(),
        }
        .into()
    }
}

// =============================================================================
// OpcUaSession
// =============================================================================

/// An activated OPC-UA session.
pub struct OpcUaSession {
    session: Arc<RwLock<UaSession>>,
    endpoint: String,
    timeout: Duration,
}

impl OpcUaSession {
    /// Endpoint url.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T, F>(&self, service: F) -> Result<T, FetchError>
    where
        T: Send + 'static,
        F: FnOnce(&UaSession) -> Result<T, StatusCode> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let task = tokio::task::spawn_blocking(move || {
            let session = session.read();
            service(&*session)
        });
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result.map_err(service_error),
            Ok(Err(join)) => Err(FetchError::Aborted(join.to_string())),
            Err(_) => Err(TransportError::ReadTimeout {
                timeout: self.timeout,
            }
            .into()),
        }
    }

    /// Reads the value attribute of `nodes`.
    pub async fn read(&self, nodes: Vec<ReadValueId>) -> Result<Vec<DataValue>, FetchError> {
        tracing::trace!(endpoint = %self.endpoint, nodes = nodes.len(), "OPC-UA read");
        self.call(move |session| session.read(&nodes, TimestampsToReturn::Neither, 0.0))
            .await
    }

    /// Writes `values` and returns one status per value.
    pub async fn write(&self, values: Vec<WriteValue>) -> Result<Vec<StatusCode>, FetchError> {
        tracing::trace!(endpoint = %self.endpoint, values = values.len(), "OPC-UA write");
        self.call(move |session| session.write(&values)).await
    }
}

impl std::fmt::Debug for OpcUaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcUaSession")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

// =============================================================================
// OpcUaConnector
// =============================================================================

/// Opens anonymous sessions without message security.
#[derive(Debug, Clone)]
pub struct OpcUaConnector {
    endpoint: String,
    timeout: Duration,
}

impl OpcUaConnector {
    /// Creates a connector for `endpoint` (`opc.tcp://host:port/path`).
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    fn open(endpoint: &str, timeout: Duration) -> Result<Arc<RwLock<UaSession>>, TransportError> {
        let mut client = ClientBuilder::new()
            .application_name(APPLICATION_NAME)
            .application_uri(APPLICATION_URI)
            .product_uri(APPLICATION_URI)
            .pki_dir(std::env::temp_dir().join("fieldpoll-pki"))
            .create_sample_keypair(true)
            .trust_server_certs(true)
            .session_retry_limit(0)
            .session_timeout(timeout.as_millis().max(1000) as u32)
            .client()
            .ok_or_else(|| TransportError::handshake("OPC-UA client configuration rejected"))?;

        client
            .connect_to_endpoint(
                (
                    endpoint,
                    SecurityPolicy::None.to_str(),
                    MessageSecurityMode::None,
                    UserTokenPolicy::anonymous(),
                ),
                IdentityToken::Anonymous,
            )
            .map_err(|status| {
                TransportError::connect(
                    endpoint,
                    io::Error::new(io::ErrorKind::ConnectionRefused, status.to_string()),
                )
            })
    }
}

#[async_trait]
impl Connector for OpcUaConnector {
    type Session = OpcUaSession;

    async fn connect(&self) -> Result<OpcUaSession, TransportError> {
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;
        let task = tokio::task::spawn_blocking(move || Self::open(&endpoint, timeout));

        let session = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => return Err(TransportError::handshake(join.to_string())),
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    target: self.endpoint.clone(),
                    timeout: self.timeout,
                })
            }
        };

        tracing::info!(endpoint = %self.endpoint, "Connected to OPC-UA server");
        Ok(OpcUaSession {
            session,
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
        })
    }

    fn close(&self, session: OpcUaSession) {
        tracing::info!(endpoint = %self.endpoint, "Closing OPC-UA session");
        let disconnect = move || {
            session.session.read().disconnect();
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(disconnect);
            }
            Err(_) => disconnect(),
        }
    }

    fn target(&self) -> String {
        self.endpoint.clone()
    }
}
