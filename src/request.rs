//! Requests: one logical access to one PLC data item.
//!
//! A request is created once per access point by a connection factory and
//! re-enqueued on a transaction every control cycle. It binds an
//! [`Address`] (where the item lives in the PLC) to a [`SharedData`] buffer
//! and a `data_offset` (where the item lives in the buffer).
//!
//! Running a request is a two-step state machine driven by the transaction:
//! [`Request::write`] encodes and flushes the request frame, and after the
//! transaction has paced the response, [`Request::read`] decodes and
//! validates it and maps the payload into the buffer.

use std::fmt::Debug;

use crate::address::Address;
use crate::connection::{Link, Protocol};
use crate::data::{self, SharedData};
use crate::error::{PlcError, Result};

/// Interpretation of the addressed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    /// A single bit.
    Bit,
    /// One or more bytes.
    Byte,
    /// One or more 16-bit words.
    Word,
    /// One or more 32-bit double words.
    Dword,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Bit => write!(f, "BIT"),
            DataType::Byte => write!(f, "BYTE"),
            DataType::Word => write!(f, "WORD"),
            DataType::Dword => write!(f, "DWORD"),
        }
    }
}

/// Direction of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// PLC to buffer.
    Read,
    /// Buffer to PLC.
    Write,
}

/// One encodable, decodable access to a PLC data item.
pub trait Request: Debug + Send + Sync {
    /// Direction of the request.
    fn kind(&self) -> RequestKind;

    /// Protocol the request is framed for.
    fn protocol(&self) -> Protocol;

    /// Bound data type.
    fn data_type(&self) -> DataType;

    /// PLC-side location.
    fn address(&self) -> &Address;

    /// Position of the item inside the bound buffer.
    fn data_offset(&self) -> usize;

    /// Bound buffer.
    fn data(&self) -> &SharedData;

    /// Encodes the request frame and flushes it to the link.
    fn write(&self, link: &mut Link) -> Result<()>;

    /// Reads and validates the response, then maps its payload.
    fn read(&self, link: &mut Link) -> Result<()>;
}

/// Fields every request carries.
#[derive(Debug)]
pub(crate) struct RequestCore {
    pub(crate) data_type: DataType,
    pub(crate) address: Address,
    pub(crate) data_offset: usize,
    pub(crate) data: SharedData,
}

impl RequestCore {
    /// Checks the geometry every protocol agrees on.
    ///
    /// A BIT request needs a bit index and moves exactly one byte of the
    /// buffer; other types move `address.size()` bytes. The moved bytes
    /// must lie inside the buffer.
    pub(crate) fn new(
        data_type: DataType,
        address: Address,
        data_offset: usize,
        data: SharedData,
    ) -> Result<Self> {
        address.require_byte_index()?;
        let width = match data_type {
            DataType::Bit => {
                address.require_bit_index()?;
                if address.size() != 1 {
                    return Err(PlcError::invalid_parameter(
                        "size",
                        format!("BIT item must occupy 1 byte, got {}", address.size()),
                    ));
                }
                1
            }
            _ => {
                if address.size() == 0 {
                    return Err(PlcError::invalid_parameter(
                        "size",
                        format!("{data_type} item must occupy at least 1 byte"),
                    ));
                }
                address.size()
            }
        };
        let len = data::lock(&data).len();
        match data_offset.checked_add(width) {
            Some(end) if end <= len => {}
            _ => {
                return Err(PlcError::IndexOutOfRange {
                    index: data_offset,
                    width,
                    len,
                })
            }
        }
        Ok(Self {
            data_type,
            address,
            data_offset,
            data,
        })
    }

    pub(crate) fn byte_index(&self) -> usize {
        self.address.byte_index().unwrap_or(0)
    }

    pub(crate) fn bit_index(&self) -> u8 {
        self.address.bit_index().unwrap_or(0)
    }

    /// `byte * 8 + bit + offset`, the bit number of the item's first bit.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::InvalidAddressing` if the byte index is too large
    /// to be expressed in bits.
    pub(crate) fn bit_address(&self, offset: usize) -> Result<usize> {
        let byte = self.byte_index();
        byte.checked_mul(8)
            .and_then(|bits| bits.checked_add(usize::from(self.bit_index())))
            .and_then(|bits| bits.checked_add(offset))
            .ok_or_else(|| {
                PlcError::invalid_addressing(format!(
                    "byte index {byte} overflows the bit address range"
                ))
            })
    }
}
