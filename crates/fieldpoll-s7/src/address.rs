// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! S7 variable addresses.
//!
//! | Example | Area | Access |
//! |---------|------|--------|
//! | `DB1.DBX0.3` | data block 1 | bit 3 of byte 0 |
//! | `DB1.DBB4`, `DB1.DBW4`, `DB1.DBD4` | data block 1 | from byte 4 |
//! | `DB2.DBS10` | data block 2 | string bytes from byte 10 |
//! | `M10.3`, `MB4`, `MW4`, `MD4` | merkers | |
//! | `I0.1` / `E0.1`, `IW0` | process inputs | |
//! | `Q2.0` / `A2.0`, `QB2` | process outputs | |
//!
//! The size letter names where a value starts; how many bytes are read
//! follows from the variable's data type.

use std::fmt;

use thiserror::Error;

/// Area code: process inputs.
pub const AREA_INPUTS: u8 = 0x81;
/// Area code: process outputs.
pub const AREA_OUTPUTS: u8 = 0x82;
/// Area code: merkers.
pub const AREA_MERKERS: u8 = 0x83;
/// Area code: data blocks.
pub const AREA_DATA_BLOCK: u8 = 0x84;

// =============================================================================
// Area
// =============================================================================

/// A PLC memory area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Area {
    /// Process inputs (`I` / `E`).
    Inputs,
    /// Process outputs (`Q` / `A`).
    Outputs,
    /// Merkers (`M`).
    Merkers,
    /// Data block with its number.
    DataBlock(u16),
}

impl Area {
    /// Wire code of the area.
    pub const fn code(&self) -> u8 {
        match self {
            Self::Inputs => AREA_INPUTS,
            Self::Outputs => AREA_OUTPUTS,
            Self::Merkers => AREA_MERKERS,
            Self::DataBlock(_) => AREA_DATA_BLOCK,
        }
    }

    /// Data block number, 0 outside data blocks.
    pub const fn db(&self) -> u16 {
        match self {
            Self::DataBlock(n) => *n,
            _ => 0,
        }
    }

    /// Returns true if writes are accepted.
    pub const fn is_writable(&self) -> bool {
        !matches!(self, Self::Inputs)
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inputs => f.write_str("I"),
            Self::Outputs => f.write_str("Q"),
            Self::Merkers => f.write_str("M"),
            Self::DataBlock(n) => write!(f, "DB{}", n),
        }
    }
}

// =============================================================================
// Access
// =============================================================================

/// The size letter of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Single bit (`X`, or a bare `byte.bit`).
    Bit(u8),
    /// Byte (`B`).
    Byte,
    /// Word (`W`).
    Word,
    /// Double word (`D`).
    DWord,
    /// String bytes (`S`).
    String,
}

impl Access {
    /// Returns the bit index for bit access.
    pub const fn bit(&self) -> Option<u8> {
        match self {
            Self::Bit(b) => Some(*b),
            _ => None,
        }
    }

    const fn letter(&self) -> char {
        match self {
            Self::Bit(_) => 'X',
            Self::Byte => 'B',
            Self::Word => 'W',
            Self::DWord => 'D',
            Self::String => 'S',
        }
    }
}

// =============================================================================
// S7Address
// =============================================================================

/// Why an address string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum S7AddressError {
    /// Nothing to parse.
    #[error("address is empty")]
    Empty,
    /// The area prefix is unknown.
    #[error("unknown area in '{0}'")]
    UnknownArea(String),
    /// The data block number is missing or out of range.
    #[error("invalid data block number in '{0}'")]
    InvalidDataBlock(String),
    /// The size letter is unknown.
    #[error("unknown size letter in '{0}'")]
    InvalidSize(String),
    /// The byte offset is not a number.
    #[error("invalid byte offset in '{0}'")]
    InvalidOffset(String),
    /// The bit is missing or not 0..=7.
    #[error("invalid bit in '{0}', expected 0..=7")]
    InvalidBit(String),
}

/// A parsed S7 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct S7Address {
    /// Memory area.
    pub area: Area,
    /// Byte offset within the area.
    pub byte: u32,
    /// Size letter.
    pub access: Access,
}

impl S7Address {
    /// Parses an address such as `DB1.DBW4` or `M10.3`.
    pub fn parse(s: &str) -> Result<Self, S7AddressError> {
        let text = s.trim().to_ascii_uppercase();
        if text.is_empty() {
            return Err(S7AddressError::Empty);
        }

        if let Some(rest) = text.strip_prefix("DB") {
            let (number, item) = rest
                .split_once('.')
                .ok_or_else(|| S7AddressError::InvalidDataBlock(s.to_string()))?;
            let db: u16 = number
                .parse()
                .map_err(|_| S7AddressError::InvalidDataBlock(s.to_string()))?;
            let item = item
                .strip_prefix("DB")
                .ok_or_else(|| S7AddressError::InvalidSize(s.to_string()))?;
            return parse_item(s, Area::DataBlock(db), item, false);
        }

        let mut chars = text.chars();
        let area = match chars.next() {
            Some('I') | Some('E') => Area::Inputs,
            Some('Q') | Some('A') => Area::Outputs,
            Some('M') => Area::Merkers,
            _ => return Err(S7AddressError::UnknownArea(s.to_string())),
        };
        parse_item(s, area, chars.as_str(), true)
    }
}

/// Parses `<size><byte>[.<bit>]`. Outside data blocks a bare `<byte>.<bit>`
/// means bit access.
fn parse_item(
    original: &str,
    area: Area,
    item: &str,
    bare_bit: bool,
) -> Result<S7Address, S7AddressError> {
    let (letter, rest) = match item.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => (Some(c), &item[1..]),
        Some(_) if bare_bit => (None, item),
        _ => return Err(S7AddressError::InvalidSize(original.to_string())),
    };

    let (byte_str, bit_str) = match rest.split_once('.') {
        Some((byte, bit)) => (byte, Some(bit)),
        None => (rest, None),
    };
    let byte: u32 = byte_str
        .parse()
        .map_err(|_| S7AddressError::InvalidOffset(original.to_string()))?;

    let access = match letter {
        None | Some('X') => {
            let bit = bit_str
                .and_then(|b| b.parse::<u8>().ok())
                .filter(|b| *b < 8)
                .ok_or_else(|| S7AddressError::InvalidBit(original.to_string()))?;
            Access::Bit(bit)
        }
        Some(letter) => {
            if bit_str.is_some() {
                return Err(S7AddressError::InvalidOffset(original.to_string()));
            }
            match letter {
                'B' => Access::Byte,
                'W' => Access::Word,
                'D' => Access::DWord,
                'S' => Access::String,
                _ => return Err(S7AddressError::InvalidSize(original.to_string())),
            }
        }
    };

    Ok(S7Address { area, byte, access })
}

impl fmt::Display for S7Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.area {
            Area::DataBlock(n) => write!(f, "DB{}.DB{}{}", n, self.access.letter(), self.byte)?,
            area => write!(f, "{}{}{}", area, self.access.letter(), self.byte)?,
        }
        if let Access::Bit(bit) = self.access {
            write!(f, ".{}", bit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_block_addresses() {
        let addr = S7Address::parse("DB1.DBX0.3").unwrap();
        assert_eq!(addr.area, Area::DataBlock(1));
        assert_eq!(addr.byte, 0);
        assert_eq!(addr.access, Access::Bit(3));

        let addr = S7Address::parse("db10.dbd24").unwrap();
        assert_eq!(addr.area.db(), 10);
        assert_eq!(addr.area.code(), AREA_DATA_BLOCK);
        assert_eq!(addr.access, Access::DWord);
        assert_eq!(addr.to_string(), "DB10.DBD24");

        assert_eq!(S7Address::parse("DB2.DBS10").unwrap().access, Access::String);
    }

    #[test]
    fn test_area_addresses() {
        let addr = S7Address::parse("M10.3").unwrap();
        assert_eq!(addr.area, Area::Merkers);
        assert_eq!((addr.byte, addr.access), (10, Access::Bit(3)));
        assert_eq!(addr.to_string(), "MX10.3");

        assert_eq!(S7Address::parse("MW4").unwrap().access, Access::Word);
        assert_eq!(S7Address::parse("E0.1").unwrap().area, Area::Inputs);
        assert_eq!(S7Address::parse("IW0").unwrap().area.code(), AREA_INPUTS);
        assert_eq!(S7Address::parse("A2.0").unwrap().area, Area::Outputs);
        assert_eq!(S7Address::parse("QB2").unwrap().area.code(), AREA_OUTPUTS);
    }

    #[test]
    fn test_invalid_addresses() {
        assert_eq!(S7Address::parse(" "), Err(S7AddressError::Empty));
        assert!(matches!(S7Address::parse("Z1"), Err(S7AddressError::UnknownArea(_))));
        assert!(matches!(
            S7Address::parse("DBX.DBW0"),
            Err(S7AddressError::InvalidDataBlock(_))
        ));
        assert!(matches!(S7Address::parse("DB1.DBX0.8"), Err(S7AddressError::InvalidBit(_))));
        assert!(matches!(S7Address::parse("DB1.DBX0"), Err(S7AddressError::InvalidBit(_))));
        assert!(matches!(S7Address::parse("MQ4"), Err(S7AddressError::InvalidSize(_))));
        assert!(matches!(S7Address::parse("MW4.1"), Err(S7AddressError::InvalidOffset(_))));
    }

    #[test]
    fn test_inputs_read_only() {
        assert!(!Area::Inputs.is_writable());
        assert!(Area::DataBlock(1).is_writable());
    }
}
