// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! ISO-on-TCP and S7 telegrams.
//!
//! Every telegram starts with a TPKT header and a COTP header:
//!
//! ```text
//!  0   1   2   3      4    5    6
//! [03][00][len len]  [02][F0][80]   TPKT (RFC 1006) + COTP data, last unit
//! ```
//!
//! followed by the S7 header (`0x32`, message type, PDU reference,
//! parameter and data lengths) and the job parameters.
//!
//! Offsets below are relative to the start of the telegram.

use bytes::{BufMut, BytesMut};
use fieldpoll_core::ProtocolError;

/// RFC 1006 version byte.
pub const TPKT_VERSION: u8 = 0x03;
/// TPKT + COTP data header length.
pub const TPKT_ISO_LEN: usize = 7;
/// S7 protocol id.
pub const S7_ID: u8 = 0x32;
/// PDU size requested during setup.
pub const PDU_SIZE_REQUEST: u16 = 480;

/// COTP connection request TPDU code.
pub const COTP_CONNECT_REQUEST: u8 = 0xE0;
/// COTP connection confirm TPDU code.
pub const COTP_CONNECT_CONFIRM: u8 = 0xD0;

/// Length of a connection request telegram.
pub const CONNECT_REQUEST_LEN: usize = 22;
/// Length of a setup-communication telegram.
pub const SETUP_REQUEST_LEN: usize = 25;
/// Length of a setup-communication reply.
pub const SETUP_RESPONSE_LEN: usize = 27;
/// Length of a read-var request.
pub const READ_REQUEST_LEN: usize = 31;
/// Length of a write-var request header, without payload.
pub const WRITE_HEADER_LEN: usize = 35;
/// Offset of the data in a read-var reply.
pub const READ_DATA_OFFSET: usize = 25;
/// Length of a write-var reply.
pub const WRITE_RESPONSE_LEN: usize = 22;
/// Offset of the item return code in read and write replies.
pub const RETURN_CODE_OFFSET: usize = 21;

/// Reply header size the PDU budget reserves for reads.
pub const READ_OVERHEAD: u16 = 18;
/// Request header size the PDU budget reserves for writes.
pub const WRITE_OVERHEAD: u16 = 28;

/// Item return code: success.
pub const RETURN_SUCCESS: u8 = 0xFF;
/// Item return code: address out of range.
pub const RETURN_INVALID_ADDRESS: u8 = 0x05;
/// Item return code: object does not exist.
pub const RETURN_NOT_FOUND: u8 = 0x0A;

/// Word length: bit.
pub const WORDLEN_BIT: u8 = 0x01;
/// Word length: byte.
pub const WORDLEN_BYTE: u8 = 0x02;

/// Data transport size: bit.
pub const TRANSPORT_BIT: u8 = 0x03;
/// Data transport size: byte/word/dword.
pub const TRANSPORT_BYTE: u8 = 0x04;

const FUNCTION_READ_VAR: u8 = 0x04;
const FUNCTION_WRITE_VAR: u8 = 0x05;
const MESSAGE_JOB: u8 = 0x01;
const MESSAGE_ACK_DATA: u8 = 0x03;

// =============================================================================
// TSAP
// =============================================================================

/// Local TSAP used for every connection.
pub const LOCAL_TSAP: u16 = 0x0100;

/// Remote TSAP for a connection type, rack and slot.
pub const fn remote_tsap(connection_type: u16, rack: u16, slot: u16) -> u16 {
    (connection_type << 8) + rack * 0x20 + slot
}

// =============================================================================
// Requests
// =============================================================================

fn put_header(buf: &mut BytesMut, total: usize) {
    buf.put_u8(TPKT_VERSION);
    buf.put_u8(0);
    buf.put_u16(total as u16);
    buf.put_slice(&[0x02, 0xF0, 0x80]);
}

fn put_s7_job(buf: &mut BytesMut, pdu_ref: u16, params: u16, data: u16) {
    buf.put_u8(S7_ID);
    buf.put_u8(MESSAGE_JOB);
    buf.put_u16(0);
    buf.put_u16(pdu_ref);
    buf.put_u16(params);
    buf.put_u16(data);
}

/// COTP connection request.
pub fn connect_request(local_tsap: u16, remote_tsap: u16) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(CONNECT_REQUEST_LEN);
    buf.put_u8(TPKT_VERSION);
    buf.put_u8(0);
    buf.put_u16(CONNECT_REQUEST_LEN as u16);
    buf.put_u8(0x11);
    buf.put_u8(COTP_CONNECT_REQUEST);
    buf.put_u16(0x0000); // destination reference
    buf.put_u16(0x0001); // source reference
    buf.put_u8(0x00);
    buf.put_slice(&[0xC0, 0x01, 0x0A]); // TPDU size 1024
    buf.put_slice(&[0xC1, 0x02]);
    buf.put_u16(local_tsap);
    buf.put_slice(&[0xC2, 0x02]);
    buf.put_u16(remote_tsap);
    buf.to_vec()
}

/// Setup-communication job requesting [`PDU_SIZE_REQUEST`].
pub fn setup_request(pdu_ref: u16) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(SETUP_REQUEST_LEN);
    put_header(&mut buf, SETUP_REQUEST_LEN);
    put_s7_job(&mut buf, pdu_ref, 8, 0);
    buf.put_slice(&[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01]);
    buf.put_u16(PDU_SIZE_REQUEST);
    buf.to_vec()
}

/// Encodes an item address: bit addresses as given, byte addresses times 8.
fn put_item(buf: &mut BytesMut, wordlen: u8, count: u16, area: u8, db: u16, address: u32) {
    buf.put_slice(&[0x12, 0x0A, 0x10]);
    buf.put_u8(wordlen);
    buf.put_u16(count);
    buf.put_u16(db);
    buf.put_u8(area);
    let [_, a2, a1, a0] = address.to_be_bytes();
    buf.put_slice(&[a2, a1, a0]);
}

/// Read-var job for `count` bytes starting at byte `start`.
pub fn read_request(pdu_ref: u16, area: u8, db: u16, start: u32, count: u16) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(READ_REQUEST_LEN);
    put_header(&mut buf, READ_REQUEST_LEN);
    put_s7_job(&mut buf, pdu_ref, 14, 0);
    buf.put_u8(FUNCTION_READ_VAR);
    buf.put_u8(1);
    put_item(&mut buf, WORDLEN_BYTE, count, area, db, start << 3);
    buf.to_vec()
}

/// What a write-var job stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    /// One bit at `byte.bit`.
    Bit {
        /// Byte offset.
        byte: u32,
        /// Bit index.
        bit: u8,
    },
    /// Bytes from `byte`.
    Bytes {
        /// Byte offset.
        byte: u32,
    },
}

/// Write-var job.
///
/// Bit targets are sent with word length bit, transport size `0x03` and a
/// payload length of one bit. Byte targets use word length byte, transport
/// size `0x04` and a payload length of `data.len() * 8` bits.
pub fn write_request(pdu_ref: u16, area: u8, db: u16, target: WriteTarget, data: &[u8]) -> Vec<u8> {
    let (wordlen, transport, address, bits) = match target {
        WriteTarget::Bit { byte, bit } => (WORDLEN_BIT, TRANSPORT_BIT, byte * 8 + bit as u32, 1u16),
        WriteTarget::Bytes { byte } => (
            WORDLEN_BYTE,
            TRANSPORT_BYTE,
            byte << 3,
            (data.len() * 8) as u16,
        ),
    };
    let total = WRITE_HEADER_LEN + data.len();

    let mut buf = BytesMut::with_capacity(total);
    put_header(&mut buf, total);
    put_s7_job(&mut buf, pdu_ref, 14, data.len() as u16 + 4);
    buf.put_u8(FUNCTION_WRITE_VAR);
    buf.put_u8(1);
    put_item(&mut buf, wordlen, data.len() as u16, area, db, address);
    buf.put_u8(0x00);
    buf.put_u8(transport);
    buf.put_u16(bits);
    buf.put_slice(data);
    buf.to_vec()
}

// =============================================================================
// Replies
// =============================================================================

/// Validates the TPKT/COTP header and returns the full telegram length.
pub fn telegram_len(header: &[u8]) -> Result<usize, ProtocolError> {
    if header.len() < TPKT_ISO_LEN {
        return Err(ProtocolError::ShortResponse {
            expected: TPKT_ISO_LEN,
            actual: header.len(),
        });
    }
    if header[0] != TPKT_VERSION || header[4] != 0x02 || header[5] != 0xF0 {
        return Err(ProtocolError::malformed("invalid ISO header"));
    }
    if header[6] != 0x80 {
        return Err(ProtocolError::malformed("fragmented ISO packet"));
    }
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    if len <= TPKT_ISO_LEN {
        return Err(ProtocolError::malformed(format!("telegram length {} carries no S7 data", len)));
    }
    Ok(len)
}

/// Checks the S7 ack-data header of a complete reply.
pub fn check_ack(telegram: &[u8], pdu_ref: u16) -> Result<(), ProtocolError> {
    if telegram.len() < RETURN_CODE_OFFSET {
        return Err(ProtocolError::ShortResponse {
            expected: RETURN_CODE_OFFSET,
            actual: telegram.len(),
        });
    }
    if telegram[7] != S7_ID || telegram[8] != MESSAGE_ACK_DATA {
        return Err(ProtocolError::malformed("not an S7 ack-data telegram"));
    }
    let actual = u16::from_be_bytes([telegram[11], telegram[12]]);
    if actual != pdu_ref {
        return Err(ProtocolError::TransactionMismatch {
            expected: pdu_ref,
            actual,
        });
    }
    let (class, code) = (telegram[17], telegram[18]);
    if class != 0 || code != 0 {
        return Err(ProtocolError::Status {
            code: u16::from_be_bytes([class, code]) as u32,
            description: format!("S7 error class {:#04x}, code {:#04x}", class, code),
        });
    }
    Ok(())
}

/// Maps an item return code.
pub fn check_return_code(code: u8) -> Result<(), ProtocolError> {
    let description = match code {
        RETURN_SUCCESS => return Ok(()),
        RETURN_INVALID_ADDRESS => "invalid address",
        RETURN_NOT_FOUND => "object does not exist",
        0x01 => "hardware fault",
        0x03 => "access denied",
        0x06 => "data type not supported",
        0x07 => "data type inconsistent",
        _ => "unspecified error",
    };
    Err(ProtocolError::Status {
        code: code as u32,
        description: description.to_string(),
    })
}

/// Returns the data of a read-var reply, at least `expected` bytes.
pub fn read_data(telegram: &[u8], pdu_ref: u16, expected: usize) -> Result<&[u8], ProtocolError> {
    check_ack(telegram, pdu_ref)?;
    if telegram.get(19) != Some(&FUNCTION_READ_VAR) {
        return Err(ProtocolError::FunctionMismatch {
            expected: FUNCTION_READ_VAR,
            actual: telegram.get(19).copied().unwrap_or(0),
        });
    }
    check_return_code(telegram.get(RETURN_CODE_OFFSET).copied().unwrap_or(0))?;
    let data = telegram.get(READ_DATA_OFFSET..).unwrap_or_default();
    if data.len() < expected {
        return Err(ProtocolError::ShortResponse {
            expected: READ_DATA_OFFSET + expected,
            actual: telegram.len(),
        });
    }
    Ok(&data[..expected])
}

/// Validates a write-var reply.
pub fn check_write(telegram: &[u8], pdu_ref: u16) -> Result<(), ProtocolError> {
    check_ack(telegram, pdu_ref)?;
    if telegram.len() < WRITE_RESPONSE_LEN {
        return Err(ProtocolError::ShortResponse {
            expected: WRITE_RESPONSE_LEN,
            actual: telegram.len(),
        });
    }
    if telegram[19] != FUNCTION_WRITE_VAR {
        return Err(ProtocolError::FunctionMismatch {
            expected: FUNCTION_WRITE_VAR,
            actual: telegram[19],
        });
    }
    check_return_code(telegram[RETURN_CODE_OFFSET])
}
