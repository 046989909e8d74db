//! Location descriptors for PLC data items.
//!
//! An [`Address`] names where a data item lives inside the PLC: the memory
//! region (a [`ModbusArea`] or an S7 data block), the byte index inside that
//! region, an optional bit index and the number of bytes the item occupies.
//! Addresses are immutable value objects. They are produced by a symbol
//! resolver or built by hand and handed to a connection's request factories.
//!
//! # Example
//!
//! ```
//! use plclink::{Address, ModbusArea};
//!
//! // bit 5 of output byte 3
//! let addr = Address::modbus(ModbusArea::PhysicalOutputDigital, 3, Some(5), 1).unwrap();
//! assert_eq!(addr.byte_index(), Some(3));
//! assert_eq!(addr.bit_index(), Some(5));
//!
//! // bit indices outside 0..=7 are rejected
//! assert!(Address::modbus(ModbusArea::PfcInput, 0, Some(8), 1).is_err());
//! ```

use crate::error::{PlcError, Result};
use crate::memory::ModbusArea;

/// Highest valid bit index within a byte.
pub const MAX_BIT_INDEX: u8 = 7;

/// Memory region an [`Address`] points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Location {
    /// One of the MODBUS controller areas.
    Modbus(ModbusArea),
    /// An S7 data block, identified by its number.
    DataBlock(u16),
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Modbus(area) => write!(f, "{area}"),
            Location::DataBlock(db) => write!(f, "DB{db}"),
        }
    }
}

/// Location of a data item inside a PLC.
///
/// `byte_index` and `bit_index` are optional. A missing byte index is only
/// acceptable for items that are never turned into a request; the request
/// factories reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address {
    location: Location,
    byte_index: Option<usize>,
    bit_index: Option<u8>,
    size: usize,
}

impl Address {
    /// Creates a new address.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::InvalidAddressing`] if `bit_index` is greater than 7.
    pub fn new(
        location: Location,
        byte_index: Option<usize>,
        bit_index: Option<u8>,
        size: usize,
    ) -> Result<Self> {
        if let Some(bit) = bit_index {
            if bit > MAX_BIT_INDEX {
                return Err(PlcError::invalid_addressing(format!(
                    "bit index {bit} not in 0..={MAX_BIT_INDEX}"
                )));
            }
        }
        Ok(Self {
            location,
            byte_index,
            bit_index,
            size,
        })
    }

    /// Creates an address inside a MODBUS area.
    pub fn modbus(
        area: ModbusArea,
        byte_index: usize,
        bit_index: Option<u8>,
        size: usize,
    ) -> Result<Self> {
        Self::new(Location::Modbus(area), Some(byte_index), bit_index, size)
    }

    /// Creates an address inside an S7 data block.
    ///
    /// # Example
    ///
    /// ```
    /// use plclink::{Address, Location};
    ///
    /// let addr = Address::data_block(10, 4, None, 2).unwrap();
    /// assert_eq!(addr.location(), Location::DataBlock(10));
    /// assert_eq!(addr.to_string(), "DB10.4 (2 bytes)");
    /// ```
    pub fn data_block(
        db_number: u16,
        byte_index: usize,
        bit_index: Option<u8>,
        size: usize,
    ) -> Result<Self> {
        Self::new(Location::DataBlock(db_number), Some(byte_index), bit_index, size)
    }

    /// Memory region of the item.
    pub fn location(&self) -> Location {
        self.location
    }

    /// MODBUS area of the item, if it lives in one.
    pub fn modbus_area(&self) -> Option<ModbusArea> {
        match self.location {
            Location::Modbus(area) => Some(area),
            Location::DataBlock(_) => None,
        }
    }

    /// Byte index inside the region.
    pub fn byte_index(&self) -> Option<usize> {
        self.byte_index
    }

    /// Bit index inside the addressed byte.
    pub fn bit_index(&self) -> Option<u8> {
        self.bit_index
    }

    /// Number of bytes the item occupies.
    pub fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn require_byte_index(&self) -> Result<usize> {
        self.byte_index
            .ok_or_else(|| PlcError::invalid_addressing(format!("{self}: byte index missing")))
    }

    pub(crate) fn require_bit_index(&self) -> Result<u8> {
        self.bit_index
            .ok_or_else(|| PlcError::invalid_addressing(format!("{self}: bit index missing")))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.location)?;
        match self.byte_index {
            Some(byte) => write!(f, ".{byte}")?,
            None => write!(f, ".NA")?,
        }
        if let Some(bit) = self.bit_index {
            write!(f, ".{bit}")?;
        }
        write!(f, " ({} bytes)", self.size)
    }
}
