// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Conversion between OPC-UA variants and typed values.
//!
//! | Variable type | Read from | Written as |
//! |---------------|-----------|------------|
//! | `bool` | Boolean, integer 0/1 | Boolean |
//! | `int16` ... `float64` | any numeric variant in range | the matching variant |
//! | `number` | any numeric variant | Double |
//! | `string` | String | String |
//!
//! Scale factors apply the same way as on register protocols: multiplied
//! on read, divided out on write.

use opcua::types::{UAString, Variant};

use fieldpoll_core::codec::{self, FieldFormat};
use fieldpoll_core::{CodecError, DataType, MemoryLayout, Value, Variable};

/// Short name of a variant kind.
pub fn variant_kind(variant: &Variant) -> &'static str {
    match variant {
        Variant::Empty => "empty",
        Variant::Boolean(_) => "boolean",
        Variant::SByte(_) => "sbyte",
        Variant::Byte(_) => "byte",
        Variant::Int16(_) => "int16",
        Variant::UInt16(_) => "uint16",
        Variant::Int32(_) => "int32",
        Variant::UInt32(_) => "uint32",
        Variant::Int64(_) => "int64",
        Variant::UInt64(_) => "uint64",
        Variant::Float(_) => "float",
        Variant::Double(_) => "double",
        Variant::String(_) => "string",
        _ => "unsupported",
    }
}

fn to_json(variant: &Variant) -> Option<serde_json::Value> {
    use serde_json::Value as J;

    Some(match variant {
        Variant::Boolean(v) => J::Bool(*v),
        Variant::SByte(v) => J::from(*v),
        Variant::Byte(v) => J::from(*v),
        Variant::Int16(v) => J::from(*v),
        Variant::UInt16(v) => J::from(*v),
        Variant::Int32(v) => J::from(*v),
        Variant::UInt32(v) => J::from(*v),
        Variant::Int64(v) => J::from(*v),
        Variant::UInt64(v) => J::from(*v),
        Variant::Float(v) => J::from(*v as f64),
        Variant::Double(v) => J::from(*v),
        Variant::String(v) => J::String(v.as_ref().to_string()),
        _ => return None,
    })
}

/// Converts a read variant into the variable's value.
pub fn from_variant(variable: &Variable, variant: &Variant) -> Result<Value, CodecError> {
    let mismatch = || CodecError::TypeMismatch {
        value_type: variant_kind(variant),
        data_type: variable.data_type,
    };

    let raw = to_json(variant).ok_or_else(mismatch)?;
    let target = match variable.data_type {
        DataType::Number => DataType::Float64,
        other => other,
    };
    let value = Value::from_json(target, &raw).map_err(|_| mismatch())?;

    Ok(match (variable.effective_scale(), value.as_f64()) {
        (Some(scale), Some(v)) => Value::Float64(v * scale),
        _ => value,
    })
}

fn array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CodecError> {
    bytes.try_into().map_err(|_| CodecError::OutOfRange {
        offset: 0,
        needed: N,
        available: bytes.len(),
    })
}

/// Converts a checked value into the variant written for `variable`.
pub fn to_variant(variable: &Variable, value: &Value) -> Result<Variant, CodecError> {
    let data_type = variable.data_type;
    let mismatch = || CodecError::TypeMismatch {
        value_type: value.type_name(),
        data_type,
    };

    match data_type {
        DataType::Bool => value.as_bool().map(Variant::Boolean).ok_or_else(mismatch),
        DataType::String => value
            .as_str()
            .map(|s| Variant::String(UAString::from(s)))
            .ok_or_else(mismatch),
        DataType::Number => {
            let v = value.as_f64().ok_or_else(mismatch)?;
            Ok(Variant::Double(match variable.effective_scale() {
                Some(scale) => v / scale,
                None => v,
            }))
        }
        wire => {
            // range checks and scaling happen in the codec
            let format = FieldFormat::for_variable(variable, MemoryLayout::Abcd);
            let width = wire.fixed_size().unwrap_or(0);
            let bytes = codec::encode(value, &format, width)?;
            Ok(match wire {
                DataType::Int16 => Variant::Int16(i16::from_be_bytes(array(&bytes)?)),
                DataType::UInt16 => Variant::UInt16(u16::from_be_bytes(array(&bytes)?)),
                DataType::Int32 => Variant::Int32(i32::from_be_bytes(array(&bytes)?)),
                DataType::Int64 => Variant::Int64(i64::from_be_bytes(array(&bytes)?)),
                DataType::Float32 => Variant::Float(f32::from_be_bytes(array(&bytes)?)),
                _ => Variant::Double(f64::from_be_bytes(array(&bytes)?)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(data_type: DataType) -> Variable {
        Variable::new("v", data_type, "ns=2;i=1")
    }

    #[test]
    fn test_read_numeric_variants() {
        assert_eq!(
            from_variant(&var(DataType::Int16), &Variant::Int32(-12)).unwrap(),
            Value::Int16(-12)
        );
        assert_eq!(
            from_variant(&var(DataType::Float64), &Variant::Double(2.5)).unwrap(),
            Value::Float64(2.5)
        );
        assert_eq!(
            from_variant(&var(DataType::Number), &Variant::UInt32(7)).unwrap(),
            Value::Float64(7.0)
        );
        assert_eq!(
            from_variant(&var(DataType::Bool), &Variant::Byte(1)).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_read_out_of_range() {
        assert!(matches!(
            from_variant(&var(DataType::Int16), &Variant::Int32(70_000)),
            Err(CodecError::TypeMismatch { value_type: "int32", .. })
        ));
        assert!(matches!(
            from_variant(&var(DataType::Int32), &Variant::Empty),
            Err(CodecError::TypeMismatch { value_type: "empty", .. })
        ));
    }

    #[test]
    fn test_read_scaled() {
        let variable = var(DataType::Int16).with_scale(0.5);
        assert_eq!(
            from_variant(&variable, &Variant::Int16(250)).unwrap(),
            Value::Float64(125.0)
        );
    }

    #[test]
    fn test_read_string() {
        assert_eq!(
            from_variant(&var(DataType::String), &Variant::String(UAString::from("pump-1"))).unwrap(),
            Value::String("pump-1".to_string())
        );
    }

    #[test]
    fn test_write_variants() {
        assert_eq!(
            to_variant(&var(DataType::Int16), &Value::Int16(-5)).unwrap(),
            Variant::Int16(-5)
        );
        assert_eq!(
            to_variant(&var(DataType::Float32), &Value::Float32(1.5)).unwrap(),
            Variant::Float(1.5)
        );
        assert_eq!(
            to_variant(&var(DataType::Bool), &Value::Bool(true)).unwrap(),
            Variant::Boolean(true)
        );
        assert_eq!(
            to_variant(&var(DataType::Number), &Value::Float64(3.0)).unwrap(),
            Variant::Double(3.0)
        );
        assert_eq!(
            to_variant(&var(DataType::String), &Value::from("on")).unwrap(),
            Variant::String(UAString::from("on"))
        );
    }

    #[test]
    fn test_write_scaled_and_overflow() {
        let variable = var(DataType::Int16).with_scale(0.5);
        assert_eq!(
            to_variant(&variable, &Value::Float64(10.0)).unwrap(),
            Variant::Int16(20)
        );
        assert!(matches!(
            to_variant(&var(DataType::UInt16), &Value::Int32(-1)),
            Err(CodecError::Overflow { .. })
        ));
    }
}
