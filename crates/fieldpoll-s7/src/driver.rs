// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The S7 protocol driver.
//!
//! Bool variables on bit addresses are written as single bits. Every other
//! type is encoded to its byte width and written as a byte range, split by
//! the negotiated PDU when needed.

use std::collections::HashMap;

use async_trait::async_trait;

use fieldpoll_core::codec::{self, FieldFormat};
use fieldpoll_core::{
    ConfigError, DataType, DeviceConfig, FetchError, FrameReading, MemoryLayout, ProtocolDriver,
    TransportAddress, ValidationError, Value, Variable,
};

use crate::address::{Access, Area, S7Address};
use crate::planner::{plan_reads, S7Frame};
use crate::protocol::{remote_tsap, WriteTarget, LOCAL_TSAP};
use crate::session::{S7Connector, S7Session};

/// An encoded S7 write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7Write {
    /// Target area.
    pub area: Area,
    /// Bit or byte range.
    pub target: WriteTarget,
    /// Bytes written; a single `0`/`1` byte for bit targets.
    pub data: Vec<u8>,
}

/// Driver for S7 PLCs over ISO-on-TCP.
#[derive(Debug, Clone)]
pub struct S7Driver {
    layout: MemoryLayout,
    addresses: HashMap<String, S7Address>,
}

impl S7Driver {
    /// Builds a driver for `device`, parsing every variable address.
    pub fn new(device: &DeviceConfig) -> Result<Self, ConfigError> {
        if !matches!(device.transport, TransportAddress::Tcp { .. }) {
            return Err(ConfigError::InvalidTransport(format!(
                "{} needs a tcp transport, got {}",
                device.model, device.transport
            )));
        }

        let mut addresses = HashMap::with_capacity(device.variables.len());
        for variable in &device.variables {
            let address = S7Address::parse(&variable.address)
                .map_err(|e| ConfigError::invalid_address(&variable.name, &variable.address, e.to_string()))?;
            addresses.insert(variable.name.clone(), address);
        }

        Ok(Self {
            layout: device.memory_layout,
            addresses,
        })
    }
}

#[async_trait]
impl ProtocolDriver for S7Driver {
    type Connector = S7Connector;
    type Frame = S7Frame;
    type Write = S7Write;

    fn connector(&self, device: &DeviceConfig) -> S7Connector {
        let (host, port) = match &device.transport {
            TransportAddress::Tcp { host, port } => (host.clone(), *port),
            // rejected by S7Driver::new
            other => (other.to_string(), 102),
        };
        let options = &device.protocol;
        S7Connector::new(
            host,
            port,
            LOCAL_TSAP,
            remote_tsap(options.connection_type, options.rack, options.slot),
            device.timeout,
        )
    }

    fn plan(&self, device: &DeviceConfig) -> Result<Vec<S7Frame>, ConfigError> {
        let addresses = device
            .variables
            .iter()
            .map(|v| {
                self.addresses.get(&v.name).copied().ok_or_else(|| {
                    ConfigError::invalid_address(&v.name, &v.address, "address was not parsed")
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        plan_reads(device, &addresses)
    }

    async fn fetch(&self, session: &mut S7Session, frame: &mut S7Frame) -> Result<FrameReading, FetchError> {
        session.read_area(frame.area, frame.start, &mut frame.data).await?;
        let (values, errors) = codec::decode_all(
            &frame.data,
            frame.entries.iter().map(|(variable, slot)| (variable, *slot)),
            self.layout,
        );
        Ok(FrameReading { values, errors })
    }

    fn encode_write(&self, variable: &Variable, value: &Value) -> Result<S7Write, ValidationError> {
        let address = self
            .addresses
            .get(&variable.name)
            .copied()
            .ok_or_else(|| ValidationError::UnknownVariable {
                name: variable.name.clone(),
            })?;
        if !address.area.is_writable() {
            return Err(ValidationError::ReadOnly {
                name: variable.name.clone(),
            });
        }

        if let (DataType::Bool, Access::Bit(bit)) = (variable.data_type, address.access) {
            let on = value.as_bool().ok_or_else(|| {
                ValidationError::invalid_value(&variable.name, DataType::Bool, value, "expected a bool")
            })?;
            return Ok(S7Write {
                area: address.area,
                target: WriteTarget::Bit {
                    byte: address.byte,
                    bit,
                },
                data: vec![on as u8],
            });
        }

        let width = variable.byte_len().unwrap_or(1);
        let format = FieldFormat::for_variable(variable, self.layout);
        let data = codec::encode(value, &format, width).map_err(|source| ValidationError::Encode {
            name: variable.name.clone(),
            source,
        })?;
        Ok(S7Write {
            area: address.area,
            target: WriteTarget::Bytes { byte: address.byte },
            data,
        })
    }

    async fn execute_write(&self, session: &mut S7Session, write: &S7Write) -> Result<(), FetchError> {
        tracing::debug!(area = %write.area, target = ?write.target, bytes = write.data.len(), "S7 write");
        session.write_area(write.area, write.target, &write.data).await
    }
}
