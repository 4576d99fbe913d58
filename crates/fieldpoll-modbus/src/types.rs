// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus register areas and variable addresses.
//!
//! Addresses are written `[area:]offset[.bit]`:
//!
//! | Area | Aliases | Read FC | Width |
//! |------|---------|---------|-------|
//! | coil | `coil`, `co`, `0x` | 1 | bit |
//! | discrete input | `discrete`, `di`, `1x` | 2 | bit |
//! | input register | `input`, `ir`, `3x` | 4 | 16-bit |
//! | holding register | `holding`, `hr`, `4x` | 3 | 16-bit |
//!
//! Without an area the address is a holding register. The `.bit` suffix
//! selects a bit of a register for `bool` variables.
//!
//! ```
//! use fieldpoll_modbus::types::{ModbusAddress, RegisterType};
//!
//! let addr = ModbusAddress::parse("hr:101.3", 1).unwrap();
//! assert_eq!(addr.register, RegisterType::HoldingRegister);
//! assert_eq!(addr.offset, 100);
//! assert_eq!(addr.bit, Some(3));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// RegisterType
// =============================================================================

/// The four Modbus data areas.
///
/// Ordering groups frames: coils first, holding registers last.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    /// Coil (read/write, 1 bit).
    ///
    /// - Function code 1: Read Coils
    /// - Function code 5: Write Single Coil
    Coil,

    /// Discrete Input (read-only, 1 bit).
    ///
    /// - Function code 2: Read Discrete Inputs
    DiscreteInput,

    /// Input Register (read-only, 16 bits).
    ///
    /// - Function code 4: Read Input Registers
    InputRegister,

    /// Holding Register (read/write, 16 bits).
    ///
    /// - Function code 3: Read Holding Registers
    /// - Function code 6: Write Single Register
    /// - Function code 16: Write Multiple Registers
    #[default]
    HoldingRegister,
}

impl RegisterType {
    // =========================================================================
    // Properties
    // =========================================================================

    /// Returns `true` if this area is writable.
    #[inline]
    pub const fn is_writable(&self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister)
    }

    /// Returns `true` if this is a bit area.
    #[inline]
    pub const fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    // =========================================================================
    // Function Codes
    // =========================================================================

    /// Returns the function code for reading this area.
    #[inline]
    pub const fn read_function_code(&self) -> u8 {
        match self {
            Self::Coil => 0x01,
            Self::DiscreteInput => 0x02,
            Self::HoldingRegister => 0x03,
            Self::InputRegister => 0x04,
        }
    }

    // =========================================================================
    // Limits
    // =========================================================================

    /// Returns the maximum number of items one read may cover.
    #[inline]
    pub const fn max_read_count(&self) -> u16 {
        match self {
            Self::Coil | Self::DiscreteInput => 2000,
            Self::HoldingRegister | Self::InputRegister => 125,
        }
    }

    /// Returns the maximum number of items one write may cover.
    #[inline]
    pub const fn max_write_count(&self) -> Option<u16> {
        match self {
            Self::Coil => Some(1968),
            Self::HoldingRegister => Some(123),
            Self::DiscreteInput | Self::InputRegister => None,
        }
    }

    /// Returns the response data length for a read of `count` items.
    #[inline]
    pub const fn response_bytes(&self, count: u16) -> usize {
        if self.is_bit() {
            (count as usize).div_ceil(8)
        } else {
            count as usize * 2
        }
    }

    /// Returns the short name.
    pub const fn short_name(&self) -> &'static str {
        match self {
            Self::Coil => "coil",
            Self::DiscreteInput => "di",
            Self::InputRegister => "ir",
            Self::HoldingRegister => "hr",
        }
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for RegisterType {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coil" | "co" | "0x" => Ok(Self::Coil),
            "discrete" | "di" | "1x" => Ok(Self::DiscreteInput),
            "input" | "ir" | "3x" => Ok(Self::InputRegister),
            "holding" | "hr" | "4x" => Ok(Self::HoldingRegister),
            other => Err(AddressError::UnknownArea(other.to_string())),
        }
    }
}

// =============================================================================
// AddressError
// =============================================================================

/// Why an address string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Nothing to parse.
    #[error("address is empty")]
    Empty,

    /// The area prefix is not recognised.
    #[error("unknown area '{0}', expected coil, discrete, input or holding")]
    UnknownArea(String),

    /// The offset is not a number in range.
    #[error("invalid offset '{0}'")]
    InvalidOffset(String),

    /// The offset is below the configured address base.
    #[error("offset {offset} is below the address base {base}")]
    BelowBase {
        /// Offset as written.
        offset: u32,
        /// Configured base.
        base: u32,
    },

    /// The bit suffix is not 0..=15.
    #[error("invalid bit '{0}', expected 0..=15")]
    InvalidBit(String),

    /// Bit areas have no sub-bits.
    #[error("{0} addresses take no bit suffix")]
    BitOnBitArea(RegisterType),
}

// =============================================================================
// ModbusAddress
// =============================================================================

/// A parsed variable address, already adjusted by the address base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModbusAddress {
    /// Data area.
    pub register: RegisterType,
    /// Zero-based protocol offset.
    pub offset: u16,
    /// Bit within a register.
    pub bit: Option<u8>,
}

impl ModbusAddress {
    /// Creates an address.
    pub const fn new(register: RegisterType, offset: u16) -> Self {
        Self {
            register,
            offset,
            bit: None,
        }
    }

    /// Parses `[area:]offset[.bit]` and subtracts `base` from the offset.
    pub fn parse(s: &str, base: u32) -> Result<Self, AddressError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }

        let (register, rest) = match s.split_once(':') {
            Some((area, rest)) => (area.parse()?, rest.trim()),
            None => (RegisterType::HoldingRegister, s),
        };

        let (offset_str, bit_str) = match rest.split_once('.') {
            Some((offset, bit)) => (offset, Some(bit)),
            None => (rest, None),
        };

        let offset: u32 = parse_number(offset_str)
            .ok_or_else(|| AddressError::InvalidOffset(offset_str.to_string()))?;
        let adjusted = offset
            .checked_sub(base)
            .ok_or(AddressError::BelowBase { offset, base })?;
        let offset = u16::try_from(adjusted)
            .map_err(|_| AddressError::InvalidOffset(offset_str.to_string()))?;

        let bit = match bit_str {
            None => None,
            Some(_) if register.is_bit() => return Err(AddressError::BitOnBitArea(register)),
            Some(b) => match b.trim().parse::<u8>() {
                Ok(bit) if bit < 16 => Some(bit),
                _ => return Err(AddressError::InvalidBit(b.to_string())),
            },
        };

        Ok(Self {
            register,
            offset,
            bit,
        })
    }
}

impl fmt::Display for ModbusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.register, self.offset)?;
        if let Some(bit) = self.bit {
            write!(f, ".{}", bit)?;
        }
        Ok(())
    }
}

/// Decimal, or hexadecimal with a `0x` prefix.
fn parse_number(s: &str) -> Option<u32> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

// =============================================================================
// Tests
// =============================================================================
