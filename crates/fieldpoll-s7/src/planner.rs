// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Read frame planning for S7 devices.
//!
//! Variables are grouped by area (and data block) and packed into byte
//! ranges no longer than one read job may return under the planning PDU.

use fieldpoll_core::plan::{self, PlanItem};
use fieldpoll_core::{ConfigError, DataType, DeviceConfig, Slot, Variable};

use crate::address::{Access, Area, S7Address};
use crate::protocol::READ_OVERHEAD;

/// One planned read job.
#[derive(Debug, Clone)]
pub struct S7Frame {
    /// Area read.
    pub area: Area,
    /// First byte.
    pub start: u32,
    /// Bytes read, reused every cycle.
    pub data: Vec<u8>,
    /// Variables decoded from this frame.
    pub entries: Vec<(Variable, Slot)>,
}

/// Bytes a variable occupies.
fn byte_len(variable: &Variable, address: &S7Address) -> Result<u32, ConfigError> {
    match (variable.data_type, address.access) {
        (DataType::Bool, Access::Bit(_)) => Ok(1),
        (DataType::Bool, _) => Err(ConfigError::unsupported_type(
            &variable.name,
            DataType::Bool,
            "bool variables need a bit address such as DB1.DBX0.0",
        )),
        (other, Access::Bit(_)) => Err(ConfigError::unsupported_type(
            &variable.name,
            other,
            "bit addresses hold bool variables only",
        )),
        (other, _) => variable.byte_len().map(|len| len as u32).ok_or_else(|| {
            ConfigError::unsupported_type(&variable.name, other, "string variables need a length")
        }),
    }
}

/// Plans read frames for `device`.
pub fn plan_reads(device: &DeviceConfig, addresses: &[S7Address]) -> Result<Vec<S7Frame>, ConfigError> {
    let pdu = device.protocol.pdu_size;
    if pdu <= READ_OVERHEAD {
        return Err(ConfigError::invalid_value(
            "protocol.pdu_size",
            format!("must exceed {} bytes", READ_OVERHEAD),
        ));
    }
    let max_span = device.protocol.span_limit((pdu - READ_OVERHEAD) as u32);

    let mut items = Vec::with_capacity(device.variables.len());
    for (index, (variable, address)) in device.variables.iter().zip(addresses).enumerate() {
        let units = byte_len(variable, address)?;
        items.push(PlanItem::new(address.area, address.byte, units, index).with_bit(address.access.bit()));
    }

    let spans = plan::pack(items, max_span).map_err(|oversized| ConfigError::SpanTooLarge {
        variable: device.variables[oversized.index].name.clone(),
        units: oversized.units,
        max: oversized.max_span,
    })?;

    let frames: Vec<S7Frame> = spans
        .into_iter()
        .map(|span| {
            let entries = span
                .members
                .iter()
                .map(|member| {
                    let variable = &device.variables[member.index];
                    let offset = member.offset as usize;
                    let slot = match member.bit {
                        Some(bit) => Slot::bit(offset, 1, bit),
                        None => Slot::bytes(offset, member.units as usize),
                    };
                    (variable.clone(), slot)
                })
                .collect();
            S7Frame {
                area: span.key,
                start: span.start,
                data: vec![0; span.units as usize],
                entries,
            }
        })
        .collect();

    tracing::debug!(
        device = %device.id,
        variables = device.variables.len(),
        frames = frames.len(),
        "Planned S7 reads"
    );
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldpoll_core::{ProtocolModel, TransportAddress};

    fn device(variables: Vec<Variable>) -> DeviceConfig {
        let mut device = DeviceConfig::new("plc", ProtocolModel::S7, TransportAddress::tcp("10.0.0.5", 102));
        device.variables = variables;
        device
    }

    fn plan(device: &DeviceConfig) -> Result<Vec<S7Frame>, ConfigError> {
        let addresses: Vec<_> = device
            .variables
            .iter()
            .map(|v| S7Address::parse(&v.address).unwrap())
            .collect();
        plan_reads(device, &addresses)
    }

    #[test]
    fn test_data_block_packing() {
        let device = device(vec![
            Variable::new("running", DataType::Bool, "DB1.DBX0.0"),
            Variable::new("fault", DataType::Bool, "DB1.DBX0.7"),
            Variable::new("speed", DataType::Int16, "DB1.DBW2"),
            Variable::new("temp", DataType::Float32, "DB1.DBD4"),
            Variable::new("marker", DataType::Bool, "M0.1"),
        ]);
        let frames = plan(&device).unwrap();
        assert_eq!(frames.len(), 2);

        assert_eq!(frames[0].area, Area::Merkers);
        assert_eq!(frames[0].entries[0].1, Slot::bit(0, 1, 1));

        let db = &frames[1];
        assert_eq!(db.area, Area::DataBlock(1));
        assert_eq!((db.start, db.data.len()), (0, 8));
        let slots: Vec<Slot> = db.entries.iter().map(|(_, s)| *s).collect();
        assert_eq!(
            slots,
            vec![Slot::bit(0, 1, 0), Slot::bit(0, 1, 7), Slot::bytes(2, 2), Slot::bytes(4, 4)]
        );
    }

    #[test]
    fn test_data_blocks_never_mix() {
        let device = device(vec![
            Variable::new("a", DataType::Int16, "DB1.DBW0"),
            Variable::new("b", DataType::Int16, "DB2.DBW0"),
        ]);
        assert_eq!(plan(&device).unwrap().len(), 2);
    }

    #[test]
    fn test_pdu_limits_span() {
        let device = device(vec![
            Variable::new("a", DataType::Int16, "DB1.DBW0"),
            Variable::new("b", DataType::Int16, "DB1.DBW300"),
        ]);
        let frames = plan(&device).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].start, 300);
    }

    #[test]
    fn test_type_and_access_must_agree() {
        let device = device(vec![Variable::new("a", DataType::Bool, "DB1.DBW0")]);
        assert!(matches!(plan(&device), Err(ConfigError::UnsupportedType { .. })));

        let device = device_with(Variable::new("a", DataType::Int16, "DB1.DBX0.1"));
        assert!(matches!(plan(&device), Err(ConfigError::UnsupportedType { .. })));

        let device = device_with(Variable::new("a", DataType::String, "DB1.DBS0"));
        assert!(matches!(plan(&device), Err(ConfigError::UnsupportedType { .. })));
    }

    fn device_with(variable: Variable) -> DeviceConfig {
        device(vec![variable])
    }

    #[test]
    fn test_oversized_string() {
        let device = device_with(Variable::new("s", DataType::String, "DB1.DBS0").with_length(400));
        assert!(matches!(
            plan(&device),
            Err(ConfigError::SpanTooLarge { units: 400, max: 222, .. })
        ));
    }
}
