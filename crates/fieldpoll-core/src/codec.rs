// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Byte codec.
//!
//! Stateless conversion between wire bytes and typed values. Multi-byte
//! numbers are first rearranged from the device's [`MemoryLayout`] into plain
//! big-endian order, then reinterpreted. Encoding runs the same steps in
//! reverse, so `decode(encode(v)) == v` for every unscaled value. With a
//! scale factor the multiply/divide pair may round (integers are rounded to
//! the nearest representable value on write).
//!
//! ```text
//!  wire bytes ──arrange(layout)──► big-endian ──from_be_bytes──► raw ──× scale──► Value
//!  Value ──÷ scale──► raw ──to_be_bytes──► big-endian ──arrange(layout)──► wire bytes
//! ```

use crate::error::{CodecError, DecodeError};
use crate::types::{DataType, MemoryLayout, Value, Variable, VariableValue};

// =============================================================================
// Slot / FieldFormat
// =============================================================================

/// Location of one variable inside a response buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Byte offset from the start of the data area.
    pub offset: usize,
    /// Number of bytes the variable occupies.
    pub length: usize,
    /// Bit within the slot for bit-backed booleans (0 = least significant).
    pub bit: Option<u8>,
}

impl Slot {
    /// A byte-aligned field.
    pub const fn bytes(offset: usize, length: usize) -> Self {
        Self {
            offset,
            length,
            bit: None,
        }
    }

    /// A single bit inside a field of `length` bytes.
    pub const fn bit(offset: usize, length: usize, bit: u8) -> Self {
        Self {
            offset,
            length,
            bit: Some(bit),
        }
    }

    /// Bit `index` of a packed LSB-first bitmap (Modbus coils).
    pub const fn packed_bit(index: usize) -> Self {
        Self::bit(index / 8, 1, (index % 8) as u8)
    }

    /// One past the last byte of the slot.
    pub const fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// How a field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldFormat {
    /// Wire type.
    pub data_type: DataType,
    /// Byte arrangement.
    pub layout: MemoryLayout,
    /// Effective scale, `None` when values are not scaled.
    pub scale: Option<f64>,
}

impl FieldFormat {
    /// Derives the format of a variable under a device layout.
    pub fn for_variable(variable: &Variable, layout: MemoryLayout) -> Self {
        Self {
            data_type: variable.data_type,
            layout,
            scale: variable.effective_scale(),
        }
    }
}

// =============================================================================
// Layout
// =============================================================================

/// Rearranges bytes between wire order and big-endian order.
///
/// The operation is its own inverse. Single bytes and odd lengths are left
/// untouched.
pub fn arrange(bytes: &mut [u8], layout: MemoryLayout) {
    if bytes.len() < 2 || bytes.len() % 2 != 0 {
        return;
    }
    if layout.swaps_words() {
        let words = bytes.len() / 2;
        for i in 0..words / 2 {
            let j = words - 1 - i;
            bytes.swap(2 * i, 2 * j);
            bytes.swap(2 * i + 1, 2 * j + 1);
        }
    }
    if layout.swaps_bytes() {
        for word in bytes.chunks_exact_mut(2) {
            word.swap(0, 1);
        }
    }
}

fn take<const N: usize>(bytes: &[u8], layout: MemoryLayout) -> Result<[u8; N], CodecError> {
    let mut out = [0u8; N];
    let src = bytes.get(..N).ok_or(CodecError::OutOfRange {
        offset: 0,
        needed: N,
        available: bytes.len(),
    })?;
    out.copy_from_slice(src);
    arrange(&mut out, layout);
    Ok(out)
}

// =============================================================================
// Decode
// =============================================================================

/// Decodes one slot of `buf`.
pub fn decode(buf: &[u8], slot: Slot, format: &FieldFormat) -> Result<Value, CodecError> {
    let bytes = buf.get(slot.offset..slot.end()).ok_or(CodecError::OutOfRange {
        offset: slot.offset,
        needed: slot.length,
        available: buf.len(),
    })?;

    let layout = format.layout;
    let raw = match format.data_type {
        DataType::Bool => return decode_bool(bytes, slot.bit, layout).map(Value::Bool),
        DataType::String => return decode_string(bytes).map(Value::String),
        DataType::Int16 => Value::Int16(i16::from_be_bytes(take::<2>(bytes, layout)?)),
        DataType::UInt16 => Value::UInt16(u16::from_be_bytes(take::<2>(bytes, layout)?)),
        DataType::Number => Value::Float64(u16::from_be_bytes(take::<2>(bytes, layout)?) as f64),
        DataType::Int32 => Value::Int32(i32::from_be_bytes(take::<4>(bytes, layout)?)),
        DataType::Float32 => Value::Float32(f32::from_be_bytes(take::<4>(bytes, layout)?)),
        DataType::Int64 => Value::Int64(i64::from_be_bytes(take::<8>(bytes, layout)?)),
        DataType::Float64 => Value::Float64(f64::from_be_bytes(take::<8>(bytes, layout)?)),
    };

    Ok(apply_scale(raw, format.scale))
}

fn decode_bool(bytes: &[u8], bit: Option<u8>, layout: MemoryLayout) -> Result<bool, CodecError> {
    let Some(bit) = bit else {
        return Ok(bytes.iter().any(|b| *b != 0));
    };
    let width = bytes.len() * 8;
    if bit as usize >= width || bytes.len() > 8 {
        return Err(CodecError::BitOutOfRange { bit, width });
    }
    let mut ordered = bytes.to_vec();
    arrange(&mut ordered, layout);
    let word = ordered.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    Ok((word >> bit) & 1 == 1)
}

fn decode_string(bytes: &[u8]) -> Result<String, CodecError> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end])
        .map(|s| s.trim_end().to_string())
        .map_err(|_| CodecError::InvalidUtf8)
}

fn apply_scale(value: Value, scale: Option<f64>) -> Value {
    match (scale, value.as_f64()) {
        (Some(s), Some(raw)) => Value::Float64(raw * s),
        _ => value,
    }
}

/// Decodes every entry against one response buffer.
///
/// A failing entry is reported and the rest still decode.
pub fn decode_all<'a, I>(
    buf: &[u8],
    entries: I,
    layout: MemoryLayout,
) -> (Vec<VariableValue>, Vec<DecodeError>)
where
    I: IntoIterator<Item = (&'a Variable, Slot)>,
{
    let mut values = Vec::new();
    let mut errors = Vec::new();
    for (variable, slot) in entries {
        let format = FieldFormat::for_variable(variable, layout);
        match decode(buf, slot, &format) {
            Ok(value) => values.push(VariableValue::new(&variable.name, value)),
            Err(e) => errors.push(DecodeError::codec(&variable.name, e)),
        }
    }
    (values, errors)
}

// =============================================================================
// Encode
// =============================================================================

/// Encodes a value into `width` wire bytes.
///
/// `width` is the field size: the type's fixed size, or the string length.
/// Booleans encode as a single `0`/`1` byte; callers that back booleans with
/// coils or register bits translate that themselves.
pub fn encode(value: &Value, format: &FieldFormat, width: usize) -> Result<Vec<u8>, CodecError> {
    let data_type = format.data_type;
    let mut bytes = match data_type {
        DataType::Bool => match value.as_bool() {
            Some(b) => return Ok(vec![b as u8]),
            None => return Err(mismatch(value, data_type)),
        },
        DataType::String => return encode_string(value, width),
        DataType::Int16 => {
            let v: i16 = to_integer(value, format)?
                .try_into()
                .map_err(|_| overflow(value, data_type))?;
            v.to_be_bytes().to_vec()
        }
        DataType::UInt16 | DataType::Number => {
            let v: u16 = to_integer(value, format)?
                .try_into()
                .map_err(|_| overflow(value, data_type))?;
            v.to_be_bytes().to_vec()
        }
        DataType::Int32 => {
            let v: i32 = to_integer(value, format)?
                .try_into()
                .map_err(|_| overflow(value, data_type))?;
            v.to_be_bytes().to_vec()
        }
        DataType::Int64 => {
            let v: i64 = to_integer(value, format)?
                .try_into()
                .map_err(|_| overflow(value, data_type))?;
            v.to_be_bytes().to_vec()
        }
        DataType::Float32 => {
            let v = to_float(value, format)?;
            if v.is_finite() && v.abs() > f32::MAX as f64 {
                return Err(overflow(value, data_type));
            }
            (v as f32).to_be_bytes().to_vec()
        }
        DataType::Float64 => to_float(value, format)?.to_be_bytes().to_vec(),
    };

    arrange(&mut bytes, format.layout);
    Ok(bytes)
}

fn mismatch(value: &Value, data_type: DataType) -> CodecError {
    CodecError::TypeMismatch {
        value_type: value.type_name(),
        data_type,
    }
}

fn overflow(value: &Value, data_type: DataType) -> CodecError {
    CodecError::Overflow {
        value: value.to_string(),
        data_type,
    }
}

fn to_float(value: &Value, format: &FieldFormat) -> Result<f64, CodecError> {
    let v = value
        .as_f64()
        .ok_or_else(|| mismatch(value, format.data_type))?;
    Ok(match format.scale {
        Some(s) => v / s,
        None => v,
    })
}

fn to_integer(value: &Value, format: &FieldFormat) -> Result<i128, CodecError> {
    if format.scale.is_none() {
        if let Some(i) = value.as_i64() {
            return Ok(i as i128);
        }
    }
    let v = to_float(value, format)?;
    if !v.is_finite() {
        return Err(overflow(value, format.data_type));
    }
    if format.scale.is_none() && v.fract() != 0.0 {
        return Err(mismatch(value, format.data_type));
    }
    let rounded = v.round();
    if rounded < i64::MIN as f64 || rounded > u64::MAX as f64 {
        return Err(overflow(value, format.data_type));
    }
    Ok(rounded as i128)
}

fn encode_string(value: &Value, width: usize) -> Result<Vec<u8>, CodecError> {
    let s = value
        .as_str()
        .ok_or_else(|| mismatch(value, DataType::String))?;
    let bytes = s.as_bytes();
    if bytes.len() > width {
        return Err(CodecError::StringTooLong {
            len: bytes.len(),
            capacity: width,
        });
    }
    let mut out = vec![0u8; width];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUTS: [MemoryLayout; 4] = [
        MemoryLayout::Abcd,
        MemoryLayout::Dcba,
        MemoryLayout::Badc,
        MemoryLayout::Cdab,
    ];

    fn format(data_type: DataType, layout: MemoryLayout) -> FieldFormat {
        FieldFormat {
            data_type,
            layout,
            scale: None,
        }
    }

    #[test]
    fn test_float32_abcd_scenario() {
        let buf = [0x41, 0x20, 0x00, 0x00];
        let value = decode(&buf, Slot::bytes(0, 4), &format(DataType::Float32, MemoryLayout::Abcd))
            .unwrap();
        assert_eq!(value, Value::Float32(10.0));
    }

    #[test]
    fn test_layout_permutations() {
        // 0x11223344 as laid out on the wire by each layout
        let cases = [
            (MemoryLayout::Abcd, [0x11, 0x22, 0x33, 0x44]),
            (MemoryLayout::Dcba, [0x44, 0x33, 0x22, 0x11]),
            (MemoryLayout::Badc, [0x22, 0x11, 0x44, 0x33]),
            (MemoryLayout::Cdab, [0x33, 0x44, 0x11, 0x22]),
        ];
        for (layout, wire) in cases {
            let value =
                decode(&wire, Slot::bytes(0, 4), &format(DataType::Int32, layout)).unwrap();
            assert_eq!(value, Value::Int32(0x1122_3344), "layout {}", layout);
        }
    }

    #[test]
    fn test_layout_64bit_word_swap() {
        let mut bytes = [1, 2, 3, 4, 5, 6, 7, 8];
        arrange(&mut bytes, MemoryLayout::Cdab);
        assert_eq!(bytes, [7, 8, 5, 6, 3, 4, 1, 2]);
        arrange(&mut bytes, MemoryLayout::Cdab);
        assert_eq!(bytes, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_round_trip_all_types_and_layouts() {
        let samples: Vec<(DataType, Value, usize)> = vec![
            (DataType::Int16, Value::Int16(-12345), 2),
            (DataType::Int16, Value::Int16(i16::MAX), 2),
            (DataType::UInt16, Value::UInt16(0xBEEF), 2),
            (DataType::Int32, Value::Int32(-123_456_789), 4),
            (DataType::Int64, Value::Int64(i64::MIN + 7), 8),
            (DataType::Float32, Value::Float32(-3.25), 4),
            (DataType::Float32, Value::Float32(f32::MIN_POSITIVE), 4),
            (DataType::Float64, Value::Float64(std::f64::consts::PI), 8),
            (DataType::Number, Value::Float64(65535.0), 2),
            (DataType::Bool, Value::Bool(true), 1),
            (DataType::String, Value::String("PUMP-3".into()), 8),
        ];

        for layout in LAYOUTS {
            for (data_type, value, width) in &samples {
                let fmt = format(*data_type, layout);
                let wire = encode(value, &fmt, *width).unwrap();
                assert_eq!(wire.len(), *width);
                let back = decode(&wire, Slot::bytes(0, *width), &fmt).unwrap();
                assert_eq!(&back, value, "{} under {}", data_type, layout);
            }
        }
    }

    #[test]
    fn test_scaled_round_trip() {
        let fmt = FieldFormat {
            data_type: DataType::Int16,
            layout: MemoryLayout::Abcd,
            scale: Some(0.1),
        };
        let wire = encode(&Value::Float64(23.4), &fmt, 2).unwrap();
        assert_eq!(i16::from_be_bytes([wire[0], wire[1]]), 234);
        let back = decode(&wire, Slot::bytes(0, 2), &fmt).unwrap();
        match back {
            Value::Float64(v) => assert!((v - 23.4).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_register_bit() {
        // word 0x0104: bits 2 and 8 set
        let buf = [0x01, 0x04];
        let fmt = format(DataType::Bool, MemoryLayout::Abcd);
        assert_eq!(decode(&buf, Slot::bit(0, 2, 2), &fmt).unwrap(), Value::Bool(true));
        assert_eq!(decode(&buf, Slot::bit(0, 2, 8), &fmt).unwrap(), Value::Bool(true));
        assert_eq!(decode(&buf, Slot::bit(0, 2, 0), &fmt).unwrap(), Value::Bool(false));
        assert!(matches!(
            decode(&buf, Slot::bit(0, 2, 16), &fmt),
            Err(CodecError::BitOutOfRange { bit: 16, width: 16 })
        ));

        // byte-swapped layout moves bit 2 to the high byte
        let swapped = format(DataType::Bool, MemoryLayout::Badc);
        assert_eq!(decode(&buf, Slot::bit(0, 2, 10), &swapped).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_packed_bits() {
        // coils 0, 3 and 9 set
        let buf = [0b0000_1001, 0b0000_0010];
        let fmt = format(DataType::Bool, MemoryLayout::Abcd);
        let read = |i| decode(&buf, Slot::packed_bit(i), &fmt).unwrap();
        assert_eq!(read(0), Value::Bool(true));
        assert_eq!(read(1), Value::Bool(false));
        assert_eq!(read(3), Value::Bool(true));
        assert_eq!(read(9), Value::Bool(true));
        assert_eq!(read(15), Value::Bool(false));
    }

    #[test]
    fn test_out_of_range_slot() {
        let buf = [0u8; 3];
        let err = decode(&buf, Slot::bytes(2, 2), &format(DataType::Int16, MemoryLayout::Abcd))
            .unwrap_err();
        assert_eq!(
            err,
            CodecError::OutOfRange {
                offset: 2,
                needed: 2,
                available: 3
            }
        );
    }

    #[test]
    fn test_string_decoding() {
        let buf = *b"AB\0\0";
        let value = decode(&buf, Slot::bytes(0, 4), &format(DataType::String, MemoryLayout::Abcd))
            .unwrap();
        assert_eq!(value, Value::String("AB".into()));

        let bad = [0xFF, 0xFE];
        assert_eq!(
            decode(&bad, Slot::bytes(0, 2), &format(DataType::String, MemoryLayout::Abcd)),
            Err(CodecError::InvalidUtf8)
        );
    }

    #[test]
    fn test_encode_rejects_bad_values() {
        let fmt = format(DataType::Int16, MemoryLayout::Abcd);
        assert!(matches!(
            encode(&Value::Int32(70_000), &fmt, 2),
            Err(CodecError::Overflow { .. })
        ));
        assert!(matches!(
            encode(&Value::Float64(1.5), &fmt, 2),
            Err(CodecError::TypeMismatch { .. })
        ));
        assert!(matches!(
            encode(&Value::Bool(true), &fmt, 2),
            Err(CodecError::TypeMismatch { .. })
        ));
        let text = format(DataType::String, MemoryLayout::Abcd);
        assert!(matches!(
            encode(&Value::String("too long".into()), &text, 4),
            Err(CodecError::StringTooLong { len: 8, capacity: 4 })
        ));
    }

    #[test]
    fn test_decode_all_isolates_failures() {
        let ok = Variable::new("ok", DataType::UInt16, "0");
        let far = Variable::new("far", DataType::UInt16, "9");
        let buf = [0x00, 0x2A];
        let (values, errors) = decode_all(
            &buf,
            [(&ok, Slot::bytes(0, 2)), (&far, Slot::bytes(18, 2))],
            MemoryLayout::Abcd,
        );
        assert_eq!(values, vec![VariableValue::new("ok", Value::UInt16(42))]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].variable(), "far");
    }
}
