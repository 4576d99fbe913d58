// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus PDUs and their TCP / RTU framing.
//!
//! ```text
//! TCP (MBAP)   [tid:2][proto=0:2][len:2][unit:1][pdu...]      len = pdu + 1
//! RTU          [unit:1][pdu...][crc lo][crc hi]               CRC-16/MODBUS
//! ```
//!
//! Request ADUs are built once per frame. Only the TCP transaction id is
//! rewritten per send; RTU requests are sent as built.

use bytes::{BufMut, BytesMut};
use fieldpoll_core::ProtocolError;

use crate::types::RegisterType;

const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

/// MBAP header length including the unit id.
pub const MBAP_LEN: usize = 7;

/// Largest Modbus ADU (TCP).
pub const MAX_ADU_LEN: usize = 260;

/// Function code: write single coil.
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
/// Function code: write single register.
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Function code: write multiple registers.
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Coil ON value for write single coil.
pub const COIL_ON: u16 = 0xFF00;
/// Coil OFF value for write single coil.
pub const COIL_OFF: u16 = 0x0000;

// =============================================================================
// Framing
// =============================================================================

/// How PDUs travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framing {
    /// MBAP header, no checksum.
    Tcp,
    /// Unit id prefix and CRC-16 suffix. Used on serial lines and RTU over TCP.
    Rtu,
}

impl Framing {
    /// Wraps `pdu` into a complete request ADU.
    ///
    /// TCP requests carry transaction id 0 until the session stamps them.
    pub fn wrap(&self, unit: u8, pdu: &[u8]) -> Vec<u8> {
        match self {
            Self::Tcp => {
                let mut buf = BytesMut::with_capacity(MBAP_LEN + pdu.len());
                buf.put_u16(0);
                buf.put_u16(0);
                buf.put_u16(pdu.len() as u16 + 1);
                buf.put_u8(unit);
                buf.put_slice(pdu);
                buf.to_vec()
            }
            Self::Rtu => {
                let mut buf = BytesMut::with_capacity(pdu.len() + 3);
                buf.put_u8(unit);
                buf.put_slice(pdu);
                let crc = crc16(&buf);
                buf.put_u16_le(crc);
                buf.to_vec()
            }
        }
    }

    /// Bytes a response adds around its PDU.
    pub const fn overhead(&self) -> usize {
        match self {
            Self::Tcp => MBAP_LEN,
            Self::Rtu => 3,
        }
    }

    /// Full response length for a PDU of `pdu_len` bytes.
    pub const fn response_len(&self, pdu_len: usize) -> usize {
        // exception replies are 2-byte PDUs
        let pdu_len = if pdu_len < 2 { 2 } else { pdu_len };
        self.overhead() + pdu_len
    }
}

/// CRC-16/MODBUS of `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC.checksum(bytes)
}

// =============================================================================
// Request PDUs
// =============================================================================

/// Read request PDU for `count` items of `register` starting at `start`.
pub fn read_pdu(register: RegisterType, start: u16, count: u16) -> [u8; 5] {
    let [s_hi, s_lo] = start.to_be_bytes();
    let [c_hi, c_lo] = count.to_be_bytes();
    [register.read_function_code(), s_hi, s_lo, c_hi, c_lo]
}

/// Write single coil PDU (FC 5).
pub fn write_coil_pdu(address: u16, on: bool) -> [u8; 5] {
    let [a_hi, a_lo] = address.to_be_bytes();
    let value = if on { COIL_ON } else { COIL_OFF };
    let [v_hi, v_lo] = value.to_be_bytes();
    [FC_WRITE_SINGLE_COIL, a_hi, a_lo, v_hi, v_lo]
}

/// Write single register PDU (FC 6).
pub fn write_register_pdu(address: u16, value: u16) -> [u8; 5] {
    let [a_hi, a_lo] = address.to_be_bytes();
    let [v_hi, v_lo] = value.to_be_bytes();
    [FC_WRITE_SINGLE_REGISTER, a_hi, a_lo, v_hi, v_lo]
}

/// Write multiple registers PDU (FC 16). `data` holds whole registers.
pub fn write_registers_pdu(address: u16, data: &[u8]) -> Vec<u8> {
    let count = (data.len() / 2) as u16;
    let mut buf = BytesMut::with_capacity(6 + data.len());
    buf.put_u8(FC_WRITE_MULTIPLE_REGISTERS);
    buf.put_u16(address);
    buf.put_u16(count);
    buf.put_u8(data.len() as u8);
    buf.put_slice(data);
    buf.to_vec()
}

// =============================================================================
// Response validation
// =============================================================================

/// Checks the function code of a response PDU and returns its body.
///
/// An exception reply becomes [`ProtocolError::Exception`].
pub fn check_function(pdu: &[u8], function: u8) -> Result<&[u8], ProtocolError> {
    let Some(&actual) = pdu.first() else {
        return Err(ProtocolError::ShortResponse {
            expected: 1,
            actual: 0,
        });
    };
    if actual == function | 0x80 {
        let code = pdu.get(1).copied().unwrap_or(0);
        return Err(ProtocolError::Exception {
            code,
            description: exception_name(code),
        });
    }
    if actual != function {
        return Err(ProtocolError::FunctionMismatch {
            expected: function,
            actual,
        });
    }
    Ok(&pdu[1..])
}

/// Validates a read response PDU and returns its data bytes.
pub fn read_payload(pdu: &[u8], function: u8, expected: usize) -> Result<&[u8], ProtocolError> {
    let body = check_function(pdu, function)?;
    let Some((&count, data)) = body.split_first() else {
        return Err(ProtocolError::ShortResponse {
            expected: expected + 2,
            actual: pdu.len(),
        });
    };
    if count as usize != expected {
        return Err(ProtocolError::malformed(format!(
            "byte count {} does not match the {} bytes requested",
            count, expected
        )));
    }
    if data.len() < expected {
        return Err(ProtocolError::ShortResponse {
            expected: expected + 2,
            actual: pdu.len(),
        });
    }
    Ok(&data[..expected])
}

/// Validates a write response. FC 5 and 6 echo the request; FC 16 echoes
/// its address and quantity.
pub fn check_write_echo(request: &[u8], response: &[u8]) -> Result<(), ProtocolError> {
    let function = request.first().copied().unwrap_or(0);
    let body = check_function(response, function)?;
    let echoed = request.get(1..request.len().min(5)).unwrap_or_default();
    if body.len() < echoed.len() {
        return Err(ProtocolError::ShortResponse {
            expected: echoed.len() + 1,
            actual: response.len(),
        });
    }
    if &body[..echoed.len()] != echoed {
        return Err(ProtocolError::malformed("write echo does not match the request"));
    }
    Ok(())
}

/// Returns the name of a Modbus exception code.
pub fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Server Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Server Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

// =============================================================================
// Tests
// =============================================================================
