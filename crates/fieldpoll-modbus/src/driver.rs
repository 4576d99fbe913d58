// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The Modbus protocol driver.
//!
//! # Writes
//!
//! | Variable | Storage | Request |
//! |----------|---------|---------|
//! | bool | coil | FC 5 |
//! | bool | register bit | FC 3 read, then FC 6 with the bit changed |
//! | 16-bit numeric | holding register | FC 6 |
//! | wider numeric, string | holding registers | FC 16 |
//!
//! Discrete inputs and input registers are read-only.

use std::collections::HashMap;

use async_trait::async_trait;

use fieldpoll_core::codec::{self, FieldFormat};
use fieldpoll_core::{
    CodecError, ConfigError, DataType, DeviceConfig, FetchError, FrameReading, MemoryLayout,
    ProtocolDriver, TransportAddress, ValidationError, Value, Variable,
};

use crate::frame::{
    check_write_echo, read_payload, read_pdu, write_coil_pdu, write_register_pdu,
    write_registers_pdu, Framing, MAX_ADU_LEN,
};
use crate::planner::{plan_reads, ReadFrame};
use crate::session::{Endpoint, ModbusConnector, ModbusSession};
use crate::types::{ModbusAddress, RegisterType};

// =============================================================================
// ModbusWrite
// =============================================================================

/// An encoded Modbus write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusWrite {
    /// Single coil.
    Coil {
        /// Coil offset.
        address: u16,
        /// New state.
        on: bool,
    },
    /// Single holding register.
    Register {
        /// Register offset.
        address: u16,
        /// New value.
        value: u16,
    },
    /// Consecutive holding registers, as wire bytes.
    Registers {
        /// First register offset.
        address: u16,
        /// Register data, an even number of bytes.
        data: Vec<u8>,
    },
    /// One bit of a holding register.
    RegisterBit {
        /// Register offset.
        address: u16,
        /// Bit index, 0 = least significant.
        bit: u8,
        /// New state.
        on: bool,
    },
}

// =============================================================================
// ModbusDriver
// =============================================================================

/// Driver for Modbus TCP, RTU and RTU over TCP.
#[derive(Debug, Clone)]
pub struct ModbusDriver {
    framing: Framing,
    endpoint: Endpoint,
    unit: u8,
    layout: MemoryLayout,
    addresses: HashMap<String, ModbusAddress>,
}

impl ModbusDriver {
    /// Builds a driver for `device`, parsing every variable address.
    pub fn new(device: &DeviceConfig) -> Result<Self, ConfigError> {
        let (framing, endpoint) = endpoint_for(device)?;

        let mut addresses = HashMap::with_capacity(device.variables.len());
        for variable in &device.variables {
            let address = ModbusAddress::parse(&variable.address, device.address_base)
                .map_err(|e| ConfigError::invalid_address(&variable.name, &variable.address, e.to_string()))?;
            addresses.insert(variable.name.clone(), address);
        }

        Ok(Self {
            framing,
            endpoint,
            unit: device.protocol.unit_id,
            layout: device.memory_layout,
            addresses,
        })
    }

    /// Returns the framing in use.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Returns where sessions are opened.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn address_of(&self, variable: &Variable) -> Result<ModbusAddress, ValidationError> {
        self.addresses
            .get(&variable.name)
            .copied()
            .ok_or_else(|| ValidationError::UnknownVariable {
                name: variable.name.clone(),
            })
    }

    async fn write_pdu(&self, session: &mut ModbusSession, pdu: &[u8]) -> Result<(), FetchError> {
        let mut request = self.framing.wrap(self.unit, pdu);
        let mut response = vec![0u8; MAX_ADU_LEN];
        let range = session.exchange(&mut request, &mut response).await?;
        check_write_echo(pdu, &response[range])?;
        Ok(())
    }

    async fn read_register(&self, session: &mut ModbusSession, address: u16) -> Result<[u8; 2], FetchError> {
        let register = RegisterType::HoldingRegister;
        let mut request = self.framing.wrap(self.unit, &read_pdu(register, address, 1));
        let mut response = vec![0u8; self.framing.response_len(4)];
        let range = session.exchange(&mut request, &mut response).await?;
        let data = read_payload(&response[range], register.read_function_code(), 2)?;
        Ok([data[0], data[1]])
    }
}

/// Resolves the framing and session endpoint the model and transport allow.
fn endpoint_for(device: &DeviceConfig) -> Result<(Framing, Endpoint), ConfigError> {
    use fieldpoll_core::ProtocolModel;

    match (device.model, &device.transport) {
        (ProtocolModel::ModbusTcp, TransportAddress::Tcp { host, port }) => Ok((
            Framing::Tcp,
            Endpoint::Tcp {
                host: host.clone(),
                port: *port,
            },
        )),
        (ProtocolModel::ModbusRtuOverTcp, TransportAddress::Tcp { host, port }) => Ok((
            Framing::Rtu,
            Endpoint::Tcp {
                host: host.clone(),
                port: *port,
            },
        )),
        (ProtocolModel::ModbusRtu, TransportAddress::Serial(settings)) => {
            Ok((Framing::Rtu, Endpoint::Serial(settings.clone())))
        }
        (model, transport) => Err(ConfigError::InvalidTransport(format!(
            "{} cannot use transport {}",
            model, transport
        ))),
    }
}

#[async_trait]
impl ProtocolDriver for ModbusDriver {
    type Connector = ModbusConnector;
    type Frame = ReadFrame;
    type Write = ModbusWrite;

    fn connector(&self, device: &DeviceConfig) -> ModbusConnector {
        ModbusConnector::new(self.endpoint.clone(), self.framing, device.timeout)
    }

    fn plan(&self, device: &DeviceConfig) -> Result<Vec<ReadFrame>, ConfigError> {
        let addresses = device
            .variables
            .iter()
            .map(|v| {
                self.addresses.get(&v.name).copied().ok_or_else(|| {
                    ConfigError::invalid_address(&v.name, &v.address, "address was not parsed")
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        plan_reads(device, &addresses, self.framing)
    }

    async fn fetch(
        &self,
        session: &mut ModbusSession,
        frame: &mut ReadFrame,
    ) -> Result<FrameReading, FetchError> {
        let range = session.exchange(&mut frame.request, &mut frame.response).await?;
        let payload = read_payload(&frame.response[range], frame.function(), frame.payload_len())?;
        let (values, errors) = codec::decode_all(
            payload,
            frame.entries.iter().map(|(variable, slot)| (variable, *slot)),
            self.layout,
        );
        Ok(FrameReading { values, errors })
    }

    fn encode_write(&self, variable: &Variable, value: &Value) -> Result<ModbusWrite, ValidationError> {
        let address = self.address_of(variable)?;
        if !address.register.is_writable() {
            return Err(ValidationError::ReadOnly {
                name: variable.name.clone(),
            });
        }

        if variable.data_type == DataType::Bool {
            let on = value.as_bool().ok_or_else(|| {
                ValidationError::invalid_value(&variable.name, DataType::Bool, value, "expected a bool")
            })?;
            return Ok(match address.register {
                RegisterType::Coil => ModbusWrite::Coil {
                    address: address.offset,
                    on,
                },
                _ => ModbusWrite::RegisterBit {
                    address: address.offset,
                    bit: address.bit.unwrap_or(0),
                    on,
                },
            });
        }

        let width = variable.byte_len().unwrap_or(2);
        let format = FieldFormat::for_variable(variable, self.layout);
        let mut data = codec::encode(value, &format, width).map_err(|source| ValidationError::Encode {
            name: variable.name.clone(),
            source,
        })?;

        if data.len() == 2 {
            return Ok(ModbusWrite::Register {
                address: address.offset,
                value: u16::from_be_bytes([data[0], data[1]]),
            });
        }

        if data.len() % 2 != 0 {
            data.push(0);
        }
        let max = RegisterType::HoldingRegister.max_write_count().unwrap_or(123) as usize;
        if data.len() / 2 > max {
            return Err(ValidationError::Encode {
                name: variable.name.clone(),
                source: CodecError::StringTooLong {
                    len: data.len(),
                    capacity: max * 2,
                },
            });
        }
        Ok(ModbusWrite::Registers {
            address: address.offset,
            data,
        })
    }

    async fn execute_write(&self, session: &mut ModbusSession, write: &ModbusWrite) -> Result<(), FetchError> {
        match write {
            ModbusWrite::Coil { address, on } => self.write_pdu(session, &write_coil_pdu(*address, *on)).await,
            ModbusWrite::Register { address, value } => {
                self.write_pdu(session, &write_register_pdu(*address, *value)).await
            }
            ModbusWrite::Registers { address, data } => {
                self.write_pdu(session, &write_registers_pdu(*address, data)).await
            }
            ModbusWrite::RegisterBit { address, bit, on } => {
                let mut word = self.read_register(session, *address).await?;
                codec::arrange(&mut word, self.layout);
                let mut current = u16::from_be_bytes(word);
                if *on {
                    current |= 1u16 << *bit;
                } else {
                    current &= !(1u16 << *bit);
                }
                let mut word = current.to_be_bytes();
                codec::arrange(&mut word, self.layout);
                let value = u16::from_be_bytes(word);
                tracing::debug!(address, bit, on, value, "Read-modify-write of register bit");
                self.write_pdu(session, &write_register_pdu(*address, value)).await
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fieldpoll_core::{Connector, ProtocolModel, SerialSettings, TransportAddress};
    use serde_json::json;

    fn device() -> DeviceConfig {
        DeviceConfig::new(
            "plc",
            ProtocolModel::ModbusTcp,
            TransportAddress::tcp("127.0.0.1", 502),
        )
        .with_variable(Variable::new("run", DataType::Bool, "coil:1"))
        .with_variable(Variable::new("alarm", DataType::Bool, "hr:5.3"))
        .with_variable(Variable::new("speed", DataType::UInt16, "hr:10"))
        .with_variable(Variable::new("temp", DataType::Float32, "hr:12"))
        .with_variable(Variable::new("tag", DataType::String, "hr:20").with_length(3))
        .with_variable(Variable::new("level", DataType::Int16, "ir:0"))
    }

    fn encode(driver: &ModbusDriver, device: &DeviceConfig, name: &str, raw: serde_json::Value) -> Result<ModbusWrite, ValidationError> {
        let variable = device.variable(name).unwrap();
        let value = Value::from_json(variable.value_type(), &raw).unwrap();
        driver.encode_write(variable, &value)
    }

    #[test]
    fn test_transport_must_match_model() {
        let mut device = device();
        device.model = ProtocolModel::ModbusRtu;
        assert!(matches!(
            ModbusDriver::new(&device),
            Err(ConfigError::InvalidTransport(_))
        ));

        device.transport = TransportAddress::Serial(SerialSettings::new("/dev/ttyUSB0", 9600));
        assert_eq!(ModbusDriver::new(&device).unwrap().framing(), Framing::Rtu);

        device.model = ProtocolModel::ModbusRtuOverTcp;
        device.transport = TransportAddress::tcp("gw", 4001);
        let driver = ModbusDriver::new(&device).unwrap();
        assert_eq!(driver.framing(), Framing::Rtu);
        assert_eq!(
            driver.endpoint(),
            &Endpoint::Tcp {
                host: "gw".to_string(),
                port: 4001
            }
        );
        assert_eq!(driver.connector(&device).target(), "gw:4001");

        device.model = ProtocolModel::ModbusTcp;
        device.transport = TransportAddress::url("opc.tcp://gw:4840");
        assert!(matches!(
            ModbusDriver::new(&device),
            Err(ConfigError::InvalidTransport(_))
        ));
    }

    #[test]
    fn test_invalid_address_rejected() {
        let device = device().with_variable(Variable::new("bad", DataType::Int16, "zz:1"));
        assert!(matches!(
            ModbusDriver::new(&device),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_address_base_applied() {
        let mut device = DeviceConfig::new(
            "plc",
            ProtocolModel::ModbusTcp,
            TransportAddress::tcp("127.0.0.1", 502),
        )
        .with_variable(Variable::new("run", DataType::Bool, "coil:1"))
        .with_variable(Variable::new("speed", DataType::UInt16, "hr:10"))
        .with_variable(Variable::new("level", DataType::Int16, "ir:1"));
        device.address_base = 1;

        let driver = ModbusDriver::new(&device).unwrap();
        assert_eq!(
            encode(&driver, &device, "speed", json!(7)).unwrap(),
            ModbusWrite::Register { address: 9, value: 7 }
        );
        assert_eq!(
            encode(&driver, &device, "run", json!(true)).unwrap(),
            ModbusWrite::Coil { address: 0, on: true }
        );
        let frames = driver.plan(&device).unwrap();
        let input = frames
            .iter()
            .find(|f| f.register == RegisterType::InputRegister)
            .unwrap();
        assert_eq!(input.start, 0);

        // offset 0 does not exist on a one-based device
        let device = device.with_variable(Variable::new("low", DataType::Int16, "hr:0"));
        assert!(matches!(
            ModbusDriver::new(&device),
            Err(ConfigError::InvalidAddress { variable, .. }) if variable == "low"
        ));
    }

    #[test]
    fn test_encode_writes() {
        let device = device();
        let driver = ModbusDriver::new(&device).unwrap();

        assert_eq!(
            encode(&driver, &device, "run", json!(true)).unwrap(),
            ModbusWrite::Coil { address: 1, on: true }
        );
        assert_eq!(
            encode(&driver, &device, "alarm", json!(false)).unwrap(),
            ModbusWrite::RegisterBit { address: 5, bit: 3, on: false }
        );
        assert_eq!(
            encode(&driver, &device, "speed", json!(1500)).unwrap(),
            ModbusWrite::Register { address: 10, value: 1500 }
        );
        assert_eq!(
            encode(&driver, &device, "temp", json!(10.0)).unwrap(),
            ModbusWrite::Registers {
                address: 12,
                data: vec![0x41, 0x20, 0x00, 0x00]
            }
        );
        assert_eq!(
            encode(&driver, &device, "tag", json!("ab")).unwrap(),
            ModbusWrite::Registers {
                address: 20,
                data: vec![b'a', b'b', 0, 0]
            }
        );
    }

    #[test]
    fn test_cdab_layout_on_write() {
        let device = device().with_memory_layout(MemoryLayout::Cdab);
        let driver = ModbusDriver::new(&device).unwrap();
        assert_eq!(
            encode(&driver, &device, "temp", json!(10.0)).unwrap(),
            ModbusWrite::Registers {
                address: 12,
                data: vec![0x00, 0x00, 0x41, 0x20]
            }
        );
    }

    #[test]
    fn test_read_only_areas() {
        let device = device();
        let driver = ModbusDriver::new(&device).unwrap();
        assert!(matches!(
            encode(&driver, &device, "level", json!(1)),
            Err(ValidationError::ReadOnly { .. })
        ));
    }

    #[test]
    fn test_string_too_long() {
        let device = device();
        let driver = ModbusDriver::new(&device).unwrap();
        assert!(matches!(
            encode(&driver, &device, "tag", json!("abcd")),
            Err(ValidationError::Encode {
                source: CodecError::StringTooLong { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_plan_uses_parsed_addresses() {
        let device = device();
        let driver = ModbusDriver::new(&device).unwrap();
        let frames = driver.plan(&device).unwrap();
        let areas: Vec<RegisterType> = frames.iter().map(|f| f.register).collect();
        assert_eq!(
            areas,
            vec![
                RegisterType::Coil,
                RegisterType::InputRegister,
                RegisterType::HoldingRegister
            ]
        );
        let holding = &frames[2];
        assert_eq!((holding.start, holding.count), (5, 17));
    }
}
