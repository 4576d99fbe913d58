// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The OPC-UA protocol driver.
//!
//! Variables are read in batches of `max_nodes_per_read` nodes, in
//! declaration order. A node answered with a bad status becomes a decode
//! error for that variable only.

use std::collections::HashMap;

use async_trait::async_trait;
use opcua::types::{
    AttributeId, DataValue, NodeId, QualifiedName, ReadValueId, StatusCode, UAString, Variant,
    WriteValue,
};

use fieldpoll_core::{
    ConfigError, DecodeError, DeviceConfig, FetchError, FrameReading, ProtocolDriver,
    ProtocolError, TransportAddress, ValidationError, Value, Variable, VariableValue,
};

use crate::convert::{from_variant, to_variant};
use crate::node::NodeAddress;
use crate::session::{OpcUaConnector, OpcUaSession};

/// A batch of nodes read in one request.
#[derive(Debug, Clone)]
pub struct NodeBatch {
    /// Read requests, one per variable.
    pub nodes: Vec<ReadValueId>,
    /// Variables in request order.
    pub variables: Vec<Variable>,
}

/// An encoded OPC-UA write.
#[derive(Debug, Clone, PartialEq)]
pub struct OpcUaWrite {
    /// Target node.
    pub node: NodeId,
    /// Value written.
    pub value: Variant,
}

/// Returns the endpoint url for a device transport.
pub fn endpoint_url(transport: &TransportAddress) -> Result<String, ConfigError> {
    match transport {
        TransportAddress::Url { url } if url.starts_with("opc.tcp://") => Ok(url.clone()),
        TransportAddress::Tcp { host, port } => Ok(format!("opc.tcp://{}:{}", host, port)),
        other => Err(ConfigError::InvalidTransport(format!(
            "opcua needs an opc.tcp:// url or a tcp transport, got {}",
            other
        ))),
    }
}

fn read_value_id(node_id: NodeId) -> ReadValueId {
    ReadValueId {
        node_id,
        attribute_id: AttributeId::Value as u32,
        index_range: UAString::null(),
        data_encoding: QualifiedName::null(),
    }
}

/// Driver for OPC-UA servers.
#[derive(Debug, Clone)]
pub struct OpcUaDriver {
    endpoint: String,
    nodes: HashMap<String, NodeId>,
}

impl OpcUaDriver {
    /// Builds a driver for `device`, parsing every node address.
    pub fn new(device: &DeviceConfig) -> Result<Self, ConfigError> {
        let endpoint = endpoint_url(&device.transport)?;

        let mut nodes = HashMap::with_capacity(device.variables.len());
        for variable in &device.variables {
            let node = NodeAddress::parse(&variable.address)
                .map_err(|e| ConfigError::invalid_address(&variable.name, &variable.address, e.to_string()))?;
            nodes.insert(variable.name.clone(), node.to_node_id());
        }

        Ok(Self { endpoint, nodes })
    }

    /// Endpoint url sessions connect to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn decode(variable: &Variable, data: &DataValue) -> Result<Value, DecodeError> {
        let status = data.status.unwrap_or(StatusCode::Good);
        if status.is_bad() {
            return Err(DecodeError::BadStatus {
                variable: variable.name.clone(),
                status: status.to_string(),
            });
        }
        let variant = data.value.as_ref().ok_or_else(|| DecodeError::BadStatus {
            variable: variable.name.clone(),
            status: "no value".to_string(),
        })?;
        from_variant(variable, variant).map_err(|e| DecodeError::codec(&variable.name, e))
    }
}

#[async_trait]
impl ProtocolDriver for OpcUaDriver {
    type Connector = OpcUaConnector;
    type Frame = NodeBatch;
    type Write = OpcUaWrite;

    fn connector(&self, device: &DeviceConfig) -> OpcUaConnector {
        OpcUaConnector::new(&self.endpoint, device.timeout)
    }

    fn plan(&self, device: &DeviceConfig) -> Result<Vec<NodeBatch>, ConfigError> {
        let batch = device.protocol.max_nodes_per_read.max(1);
        let mut frames = Vec::new();
        for chunk in device.variables.chunks(batch) {
            let mut nodes = Vec::with_capacity(chunk.len());
            for variable in chunk {
                let node = self.nodes.get(&variable.name).cloned().ok_or_else(|| {
                    ConfigError::invalid_address(&variable.name, &variable.address, "address was not parsed")
                })?;
                nodes.push(read_value_id(node));
            }
            frames.push(NodeBatch {
                nodes,
                variables: chunk.to_vec(),
            });
        }
        tracing::debug!(
            device = %device.id,
            variables = device.variables.len(),
            frames = frames.len(),
            "Planned OPC-UA reads"
        );
        Ok(frames)
    }

    async fn fetch(&self, session: &mut OpcUaSession, frame: &mut NodeBatch) -> Result<FrameReading, FetchError> {
        let results = session.read(frame.nodes.clone()).await?;
        if results.len() != frame.nodes.len() {
            return Err(ProtocolError::ShortResponse {
                expected: frame.nodes.len(),
                actual: results.len(),
            }
            .into());
        }

        let mut reading = FrameReading::default();
        for (variable, data) in frame.variables.iter().zip(&results) {
            match Self::decode(variable, data) {
                Ok(value) => reading.values.push(VariableValue::new(&variable.name, value)),
                Err(e) => reading.errors.push(e),
            }
        }
        Ok(reading)
    }

    fn encode_write(&self, variable: &Variable, value: &Value) -> Result<OpcUaWrite, ValidationError> {
        let node = self
            .nodes
            .get(&variable.name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownVariable {
                name: variable.name.clone(),
            })?;
        let value = to_variant(variable, value).map_err(|source| ValidationError::Encode {
            name: variable.name.clone(),
            source,
        })?;
        Ok(OpcUaWrite { node, value })
    }

    async fn execute_write(&self, session: &mut OpcUaSession, write: &OpcUaWrite) -> Result<(), FetchError> {
        let request = WriteValue {
            node_id: write.node.clone(),
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            value: DataValue::new_now(write.value.clone()),
        };
        let statuses = session.write(vec![request]).await?;
        let status = statuses.first().copied().ok_or(ProtocolError::ShortResponse {
            expected: 1,
            actual: 0,
        })?;
        if status.is_bad() {
            return Err(ProtocolError::Status {
                code: status.bits(),
                description: status.to_string(),
            }
            .into());
        }
        tracing::debug!(node = %write.node, "OPC-UA write accepted");
        Ok(())
    }
}
