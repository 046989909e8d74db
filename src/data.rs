//! Byte buffer with typed, bounds-checked accessors.
//!
//! [`Data`] is the exchange format between the control program and the
//! requests of a connection. It owns a plain byte array and interprets slices
//! of it as BIT, BYTE, WORD, INT, DWORD or DINT values in the byte order of
//! the protocol that produced it: little-endian for MODBUS (the register
//! byte swap happens during request mapping) and big-endian for S7.
//!
//! Every accessor checks the byte index against the buffer length, and every
//! setter checks the value range, before touching the buffer. A failed call
//! never leaves a partially written value behind.
//!
//! # Example
//!
//! ```
//! use plclink::{ByteOrder, Data};
//!
//! let mut data = Data::new(4, ByteOrder::LittleEndian);
//! data.set_word(0, 0x1234).unwrap();
//! assert_eq!(data.bytes(), &[0x34, 0x12, 0x00, 0x00]);
//! assert_eq!(data.get_word(0).unwrap(), 0x1234);
//!
//! // values outside the type's range are rejected
//! assert!(data.set_word(0, 65_536).is_err());
//! assert!(data.set_int(2, -32_769).is_err());
//!
//! // so are accesses past the end of the buffer
//! assert!(data.get_dword(1).is_err());
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{PlcError, Result};
use crate::utils;

/// Order in which multi-byte values are stored in a [`Data`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    /// Low byte at the lower index (MODBUS native layout).
    #[default]
    LittleEndian,
    /// High byte at the lower index (S7 layout).
    BigEndian,
}

/// A [`Data`] buffer shared between a request and the control program.
///
/// Requests lock the buffer for the duration of their mapping step only.
pub type SharedData = Arc<Mutex<Data>>;

/// Locks a shared buffer, recovering the guard if a previous holder panicked.
pub fn lock(data: &SharedData) -> MutexGuard<'_, Data> {
    data.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Raw byte buffer with typed accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    bytes: Vec<u8>,
    order: ByteOrder,
}

impl Data {
    /// Creates a zeroed buffer of `len` bytes.
    pub fn new(len: usize, order: ByteOrder) -> Self {
        Self {
            bytes: vec![0; len],
            order,
        }
    }

    /// Wraps existing bytes.
    pub fn from_bytes(bytes: Vec<u8>, order: ByteOrder) -> Self {
        Self { bytes, order }
    }

    /// Moves the buffer behind a mutex so it can be bound to requests.
    pub fn into_shared(self) -> SharedData {
        Arc::new(Mutex::new(self))
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte order used by the multi-byte accessors.
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Raw contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable raw contents.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Zeroes the whole buffer.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Copies `src` into the buffer starting at `byte_index`.
    pub fn copy_from_slice(&mut self, byte_index: usize, src: &[u8]) -> Result<()> {
        let range = self.range(byte_index, src.len())?;
        self.bytes[range].copy_from_slice(src);
        Ok(())
    }

    /// Returns `width` bytes starting at `byte_index`.
    pub fn slice(&self, byte_index: usize, width: usize) -> Result<&[u8]> {
        let range = self.range(byte_index, width)?;
        Ok(&self.bytes[range])
    }

    /// Reads bit `bit` of the byte at `byte_index`.
    ///
    /// # Errors
    ///
    /// [`PlcError::InvalidAddressing`] for `bit > 7`, [`PlcError::IndexOutOfRange`]
    /// if the byte lies outside the buffer.
    pub fn get_bit(&self, byte_index: usize, bit: u8) -> Result<bool> {
        check_bit(bit)?;
        Ok(utils::get_bit(self.get_byte(byte_index)?, bit))
    }

    /// Sets or clears bit `bit` of the byte at `byte_index`.
    pub fn set_bit(&mut self, byte_index: usize, bit: u8, state: bool) -> Result<()> {
        check_bit(bit)?;
        let byte = self.get_byte(byte_index)?;
        self.bytes[byte_index] = utils::set_bit(byte, bit, state);
        Ok(())
    }

    /// Reads the byte at `byte_index`.
    pub fn get_byte(&self, byte_index: usize) -> Result<u8> {
        let range = self.range(byte_index, 1)?;
        Ok(self.bytes[range.start])
    }

    /// Writes the byte at `byte_index`.
    pub fn set_byte(&mut self, byte_index: usize, value: u8) -> Result<()> {
        let range = self.range(byte_index, 1)?;
        self.bytes[range.start] = value;
        Ok(())
    }

    /// Reads an unsigned 16-bit value.
    pub fn get_word(&self, byte_index: usize) -> Result<u16> {
        let raw: [u8; 2] = self.array(byte_index)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        })
    }

    /// Writes an unsigned 16-bit value.
    ///
    /// # Errors
    ///
    /// [`PlcError::ValueOutOfRange`] unless `0 <= value <= 65535`.
    pub fn set_word(&mut self, byte_index: usize, value: i64) -> Result<()> {
        let value = u16::try_from(value)
            .map_err(|_| PlcError::value_out_of_range(format!("WORD {value} not in 0..=65535")))?;
        let raw = match self.order {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        self.put(byte_index, &raw)
    }

    /// Reads a signed 16-bit value.
    pub fn get_int(&self, byte_index: usize) -> Result<i16> {
        let raw: [u8; 2] = self.array(byte_index)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => i16::from_le_bytes(raw),
            ByteOrder::BigEndian => i16::from_be_bytes(raw),
        })
    }

    /// Writes a signed 16-bit value.
    ///
    /// # Errors
    ///
    /// [`PlcError::ValueOutOfRange`] unless `-32768 <= value <= 32767`.
    pub fn set_int(&mut self, byte_index: usize, value: i64) -> Result<()> {
        let value = i16::try_from(value).map_err(|_| {
            PlcError::value_out_of_range(format!("INT {value} not in -32768..=32767"))
        })?;
        let raw = match self.order {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        self.put(byte_index, &raw)
    }

    /// Reads an unsigned 32-bit value.
    pub fn get_dword(&self, byte_index: usize) -> Result<u32> {
        let raw: [u8; 4] = self.array(byte_index)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        })
    }

    /// Writes an unsigned 32-bit value.
    ///
    /// # Errors
    ///
    /// [`PlcError::ValueOutOfRange`] unless `0 <= value <= 2^32 - 1`.
    pub fn set_dword(&mut self, byte_index: usize, value: i64) -> Result<()> {
        let value = u32::try_from(value).map_err(|_| {
            PlcError::value_out_of_range(format!("DWORD {value} not in 0..=4294967295"))
        })?;
        let raw = match self.order {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        self.put(byte_index, &raw)
    }

    /// Reads a signed 32-bit value.
    pub fn get_dint(&self, byte_index: usize) -> Result<i32> {
        let raw: [u8; 4] = self.array(byte_index)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => i32::from_le_bytes(raw),
            ByteOrder::BigEndian => i32::from_be_bytes(raw),
        })
    }

    /// Writes a signed 32-bit value.
    pub fn set_dint(&mut self, byte_index: usize, value: i32) -> Result<()> {
        let raw = match self.order {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        self.put(byte_index, &raw)
    }

    fn range(&self, index: usize, width: usize) -> Result<std::ops::Range<usize>> {
        match index.checked_add(width) {
            Some(end) if end <= self.bytes.len() => Ok(index..end),
            _ => Err(PlcError::IndexOutOfRange {
                index,
                width,
                len: self.bytes.len(),
            }),
        }
    }

    fn array<const N: usize>(&self, index: usize) -> Result<[u8; N]> {
        let range = self.range(index, N)?;
        let mut raw = [0u8; N];
        raw.copy_from_slice(&self.bytes[range]);
        Ok(raw)
    }

    fn put(&mut self, index: usize, raw: &[u8]) -> Result<()> {
        let range = self.range(index, raw.len())?;
        self.bytes[range].copy_from_slice(raw);
        Ok(())
    }
}

fn check_bit(bit: u8) -> Result<()> {
    if bit > 7 {
        return Err(PlcError::invalid_addressing(format!(
            "bit index {bit} not in 0..=7"
        )));
    }
    Ok(())
}
