// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Read frame planning for Modbus devices.
//!
//! Variables are grouped by register area and packed into reads of at most
//! 2000 bits or 125 registers (or the configured `max_span`, if lower).
//! Each resulting [`ReadFrame`] carries its ready-to-send request ADU and a
//! response buffer sized for the largest legal reply, so a poll cycle does
//! not allocate.

use fieldpoll_core::plan::{self, PlanItem};
use fieldpoll_core::{ConfigError, DataType, DeviceConfig, Slot, Variable};

use crate::frame::{read_pdu, Framing};
use crate::types::{ModbusAddress, RegisterType};

/// One planned read request.
#[derive(Debug, Clone)]
pub struct ReadFrame {
    /// Area read.
    pub register: RegisterType,
    /// First offset.
    pub start: u16,
    /// Items read.
    pub count: u16,
    /// Complete request ADU.
    pub request: Vec<u8>,
    /// Response buffer.
    pub response: Vec<u8>,
    /// Variables decoded from this frame and where they sit in the payload.
    pub entries: Vec<(Variable, Slot)>,
}

impl ReadFrame {
    /// Function code of the request.
    pub fn function(&self) -> u8 {
        self.register.read_function_code()
    }

    /// Payload bytes a successful reply carries.
    pub fn payload_len(&self) -> usize {
        self.register.response_bytes(self.count)
    }
}

/// Units a variable occupies in its area.
fn units_of(variable: &Variable, address: &ModbusAddress) -> Result<u32, ConfigError> {
    if address.register.is_bit() {
        if variable.data_type != DataType::Bool {
            return Err(ConfigError::unsupported_type(
                &variable.name,
                variable.data_type,
                format!("{} holds single bits", address.register),
            ));
        }
        return Ok(1);
    }
    if address.bit.is_some() && variable.data_type != DataType::Bool {
        return Err(ConfigError::invalid_address(
            &variable.name,
            &variable.address,
            "only bool variables take a bit suffix",
        ));
    }
    if variable.data_type == DataType::Bool {
        return Ok(1);
    }
    let bytes = variable.byte_len().ok_or_else(|| {
        ConfigError::unsupported_type(
            &variable.name,
            variable.data_type,
            "string variables need a length",
        )
    })?;
    Ok(bytes.div_ceil(2).max(1) as u32)
}

/// Plans read frames for `device`.
///
/// `addresses` holds the parsed address of every variable, in order.
pub fn plan_reads(
    device: &DeviceConfig,
    addresses: &[ModbusAddress],
    framing: Framing,
) -> Result<Vec<ReadFrame>, ConfigError> {
    let unit = device.protocol.unit_id;

    let mut items = Vec::with_capacity(device.variables.len());
    for (index, (variable, address)) in device.variables.iter().zip(addresses).enumerate() {
        let units = units_of(variable, address)?;
        let max = device
            .protocol
            .span_limit(address.register.max_read_count() as u32);
        if address.offset as u32 + units > u16::MAX as u32 + 1 {
            return Err(ConfigError::invalid_address(
                &variable.name,
                &variable.address,
                "variable runs past the end of the address space",
            ));
        }
        if units > max {
            return Err(ConfigError::SpanTooLarge {
                variable: variable.name.clone(),
                units,
                max,
            });
        }
        items.push(
            PlanItem::new(address.register, address.offset as u32, units, index)
                .with_bit(address.bit),
        );
    }

    // limits differ per area
    let mut frames = Vec::new();
    for register in [
        RegisterType::Coil,
        RegisterType::DiscreteInput,
        RegisterType::InputRegister,
        RegisterType::HoldingRegister,
    ] {
        let group: Vec<_> = items.iter().filter(|i| i.key == register).cloned().collect();
        if group.is_empty() {
            continue;
        }
        let max = device.protocol.span_limit(register.max_read_count() as u32);
        let spans = plan::pack(group, max).map_err(|oversized| ConfigError::SpanTooLarge {
            variable: device.variables[oversized.index].name.clone(),
            units: oversized.units,
            max: oversized.max_span,
        })?;

        for span in spans {
            let start = span.start as u16;
            let count = span.units as u16;
            let entries = span
                .members
                .iter()
                .map(|member| {
                    let variable = &device.variables[member.index];
                    (variable.clone(), slot_for(register, variable, member.offset, member.bit))
                })
                .collect();

            let pdu_len = 2 + register.response_bytes(count);
            frames.push(ReadFrame {
                register,
                start,
                count,
                request: framing.wrap(unit, &read_pdu(register, start, count)),
                response: vec![0; framing.response_len(pdu_len)],
                entries,
            });
        }
    }

    tracing::debug!(
        device = %device.id,
        variables = device.variables.len(),
        frames = frames.len(),
        "Planned Modbus reads"
    );
    Ok(frames)
}

fn slot_for(register: RegisterType, variable: &Variable, offset: u32, bit: Option<u8>) -> Slot {
    let offset = offset as usize;
    if register.is_bit() {
        return Slot::packed_bit(offset);
    }
    if variable.data_type == DataType::Bool {
        return Slot::bit(offset * 2, 2, bit.unwrap_or(0));
    }
    let len = variable.byte_len().unwrap_or(2);
    Slot::bytes(offset * 2, len)
}
