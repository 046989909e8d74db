//! Transport envelopes for both wire protocols.
//!
//! # MBAP header (MODBUS/TCP)
//!
//! Every MODBUS/TCP frame starts with a 7-byte application header:
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0-1 | TID | Transaction identifier, echoed by the server |
//! | 2-3 | PID | Protocol identifier (always 0) |
//! | 4-5 | LEN | Number of bytes that follow, unit id included |
//! | 6 | UID | Unit identifier (always 0 for a coupler) |
//!
//! # ISO header (ISO-on-TCP, RFC 1006)
//!
//! Every S7 message is wrapped in a 4-byte TPKT header followed by the
//! 3-byte COTP data prolog [`PROLOG`]:
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0 | VRSN | Version (always 3) |
//! | 1 | RSV | Reserved (always 0) |
//! | 2-3 | LEN | Total message length, header included |
//!
//! # Example
//!
//! ```
//! use plclink::header::{IsoHeader, MbapHeader};
//!
//! let mbap = MbapHeader::new(1, 6);
//! assert_eq!(mbap.to_bytes(), [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x00]);
//!
//! let iso = IsoHeader::for_payload(18);
//! assert_eq!(iso.to_bytes(), [0x03, 0x00, 0x00, 0x16]);
//! ```

use crate::error::{PlcError, Result};

/// MBAP header size in bytes.
pub const MBAP_HEADER_SIZE: usize = 7;

/// ISO (TPKT) header size in bytes.
pub const ISO_HEADER_SIZE: usize = 4;

/// ISO protocol version carried by every TPKT header.
pub const ISO_VERSION: u8 = 3;

/// COTP data prolog preceding every S7 PDU.
pub const PROLOG: [u8; 3] = [0x02, 0xF0, 0x80];

/// MODBUS application protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier.
    pub transaction_id: u16,
    /// Protocol identifier, 0 for MODBUS.
    pub protocol_id: u16,
    /// Bytes following the length field.
    pub length: u16,
    /// Unit identifier.
    pub unit_id: u8,
}

impl MbapHeader {
    /// Creates a request header for unit 0.
    pub fn new(transaction_id: u16, length: u16) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length,
            unit_id: 0,
        }
    }

    /// Serializes the header.
    pub fn to_bytes(self) -> [u8; MBAP_HEADER_SIZE] {
        let tid = self.transaction_id.to_be_bytes();
        let pid = self.protocol_id.to_be_bytes();
        let len = self.length.to_be_bytes();
        [tid[0], tid[1], pid[0], pid[1], len[0], len[1], self.unit_id]
    }

    /// Parses a header.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::InvalidResponse` if the slice is too short or the
    /// protocol identifier is not 0.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MBAP_HEADER_SIZE {
            return Err(PlcError::invalid_response(format!(
                "MBAP header too short: expected {} bytes, got {}",
                MBAP_HEADER_SIZE,
                data.len()
            )));
        }
        let header = Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        };
        if header.protocol_id != 0 {
            return Err(PlcError::invalid_response(format!(
                "unexpected protocol id {}",
                header.protocol_id
            )));
        }
        Ok(header)
    }
}

/// ISO-on-TCP transport header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoHeader {
    /// Protocol version.
    pub version: u8,
    /// Reserved byte.
    pub reserved: u8,
    /// Total message length including this header.
    pub length: u16,
}

impl IsoHeader {
    /// Header for a message carrying `payload_len` bytes after the header.
    pub fn for_payload(payload_len: u16) -> Self {
        Self {
            version: ISO_VERSION,
            reserved: 0,
            length: payload_len + ISO_HEADER_SIZE as u16,
        }
    }

    /// Serializes the header.
    pub fn to_bytes(self) -> [u8; ISO_HEADER_SIZE] {
        let len = self.length.to_be_bytes();
        [self.version, self.reserved, len[0], len[1]]
    }

    /// Parses a header without validating it.
    pub fn from_bytes(data: [u8; ISO_HEADER_SIZE]) -> Self {
        Self {
            version: data[0],
            reserved: data[1],
            length: u16::from_be_bytes([data[2], data[3]]),
        }
    }

    /// Checks the version byte and the length field.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::ConnectionRefused` when the version is not 3; a PLC
    /// answers this way when it drops a connection attempt.
    pub fn validate(self) -> Result<Self> {
        if self.version != ISO_VERSION {
            return Err(PlcError::connection_refused(format!(
                "attempt to connect aborted by PLC (ISO version {})",
                self.version
            )));
        }
        if usize::from(self.length) < ISO_HEADER_SIZE {
            return Err(PlcError::invalid_response(format!(
                "ISO length {} shorter than its header",
                self.length
            )));
        }
        Ok(self)
    }

    /// Bytes following the header.
    pub fn payload_len(self) -> usize {
        usize::from(self.length).saturating_sub(ISO_HEADER_SIZE)
    }
}
