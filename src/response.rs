//! Response envelope parsing and validation.
//!
//! # MODBUS response head
//!
//! Every MODBUS/TCP response starts with the MBAP header, the function code and
//! one more byte whose meaning depends on the outcome:
//!
//! | Bytes | Field | Description |
//! |-------|-------|-------------|
//! | 0-6 | MBAP | Transaction id, protocol id, length, unit id |
//! | 7 | FC | Function code, equal to the request's on success |
//! | 8 | BC / EC | Byte count (read), first reference byte (write) or error code |
//!
//! A function code other than the request's marks a vendor error response;
//! the following byte is then reported as error code.
//!
//! # S7 acknowledge
//!
//! S7 responses carry a 12-byte header followed by the parameter and data
//! sections:
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0 | ID | Protocol id (0x32) |
//! | 1 | ROSCTR | 0x02 ack, 0x03 ack with data |
//! | 2-3 | RED | Redundancy id |
//! | 4-5 | REF | PDU reference, echoed from the job |
//! | 6-7 | PLEN | Parameter length |
//! | 8-9 | DLEN | Data length |
//! | 10 | ECLS | Error class (0x00 = success) |
//! | 11 | ECOD | Error code (0x00 = success) |
//!
//! # Example
//!
//! ```
//! use plclink::response::ModbusResponse;
//!
//! let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x00, 0x03, 0x02];
//! let response = ModbusResponse::from_bytes(&bytes).unwrap();
//! assert_eq!(response.function_code, 0x03);
//! assert!(response.check(0x03, 1).is_ok());
//! assert!(response.check(0x02, 1).is_err());
//! ```

use tracing::warn;

use crate::error::{PlcError, Result};
use crate::header::{MbapHeader, MBAP_HEADER_SIZE};

/// Size of the MODBUS response head: MBAP header, function code and one byte.
pub const MODBUS_RESPONSE_HEAD_SIZE: usize = MBAP_HEADER_SIZE + 2;

/// S7 protocol id.
pub const S7_PROTOCOL_ID: u8 = 0x32;

/// Size of an S7 acknowledge header.
pub const S7_ACK_HEADER_SIZE: usize = 12;

/// S7 item return code for success.
pub const S7_RETURN_SUCCESS: u8 = 0xFF;

/// Parsed head of a MODBUS/TCP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusResponse {
    /// MBAP header.
    pub header: MbapHeader,
    /// Function code.
    pub function_code: u8,
    /// Byte count, first body byte or error code.
    pub value: u8,
}

impl ModbusResponse {
    /// Parses a response head.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::InvalidResponse` if the slice is too short or the
    /// MBAP header is invalid.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MODBUS_RESPONSE_HEAD_SIZE {
            return Err(PlcError::invalid_response(format!(
                "response too short: expected at least {} bytes, got {}",
                MODBUS_RESPONSE_HEAD_SIZE,
                data.len()
            )));
        }
        Ok(Self {
            header: MbapHeader::from_bytes(data)?,
            function_code: data[MBAP_HEADER_SIZE],
            value: data[MBAP_HEADER_SIZE + 1],
        })
    }

    /// Validates the response against the request that caused it.
    ///
    /// A transaction id mismatch is only logged; couplers in the field are
    /// known to echo stale ids.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::InvalidFunctionCode` when the function code differs
    /// from `expected_function`.
    pub fn check(&self, expected_function: u8, expected_transaction_id: u16) -> Result<()> {
        if self.function_code != expected_function {
            return Err(PlcError::InvalidFunctionCode {
                function_code: self.function_code,
                error_code: self.value,
            });
        }
        if self.header.transaction_id != expected_transaction_id {
            warn!(
                expected = expected_transaction_id,
                received = self.header.transaction_id,
                "MODBUS transaction id mismatch"
            );
        }
        Ok(())
    }
}

/// Parsed S7 acknowledge PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7Ack {
    /// Message type.
    pub rosctr: u8,
    /// PDU reference.
    pub pdu_ref: u16,
    /// Parameter section.
    pub params: Vec<u8>,
    /// Data section.
    pub data: Vec<u8>,
}

impl S7Ack {
    /// Parses an S7 acknowledge, the COTP prolog already stripped.
    ///
    /// # Errors
    ///
    /// - `PlcError::InvalidResponse` for a foreign protocol id, a message
    ///   type other than acknowledge or truncated sections
    /// - `PlcError::JobRejected` if the header carries an error class or code
    pub fn from_bytes(pdu: &[u8], expected_ref: u16) -> Result<Self> {
        if pdu.len() < S7_ACK_HEADER_SIZE {
            return Err(PlcError::invalid_response(format!(
                "S7 header too short: expected {} bytes, got {}",
                S7_ACK_HEADER_SIZE,
                pdu.len()
            )));
        }
        if pdu[0] != S7_PROTOCOL_ID {
            return Err(PlcError::invalid_response(format!(
                "unexpected S7 protocol id 0x{:02X}",
                pdu[0]
            )));
        }
        let rosctr = pdu[1];
        if rosctr != 0x02 && rosctr != 0x03 {
            return Err(PlcError::invalid_response(format!(
                "unexpected S7 message type 0x{rosctr:02X}"
            )));
        }
        let (error_class, error_code) = (pdu[10], pdu[11]);
        if error_class != 0 || error_code != 0 {
            return Err(PlcError::JobRejected {
                error_class,
                error_code,
            });
        }
        let pdu_ref = u16::from_be_bytes([pdu[4], pdu[5]]);
        if pdu_ref != expected_ref {
            warn!(
                expected = expected_ref,
                received = pdu_ref,
                "S7 PDU reference mismatch"
            );
        }
        let param_len = usize::from(u16::from_be_bytes([pdu[6], pdu[7]]));
        let data_len = usize::from(u16::from_be_bytes([pdu[8], pdu[9]]));
        let params_end = S7_ACK_HEADER_SIZE + param_len;
        let data_end = params_end + data_len;
        if pdu.len() < data_end {
            return Err(PlcError::invalid_response(format!(
                "S7 PDU truncated: sections need {} bytes, got {}",
                data_end,
                pdu.len()
            )));
        }
        Ok(Self {
            rosctr,
            pdu_ref,
            params: pdu[S7_ACK_HEADER_SIZE..params_end].to_vec(),
            data: pdu[params_end..data_end].to_vec(),
        })
    }

    /// Checks that the parameter section answers `function`.
    pub fn expect_function(&self, function: u8) -> Result<()> {
        match self.params.first() {
            Some(&f) if f == function => Ok(()),
            other => Err(PlcError::invalid_response(format!(
                "expected S7 function 0x{function:02X}, got {other:02X?}"
            ))),
        }
    }

    /// PDU length accepted by the PLC in a setup-communication acknowledge.
    pub fn negotiated_pdu_length(&self) -> Result<u16> {
        self.expect_function(0xF0)?;
        match self.params.get(6..8) {
            Some(&[hi, lo]) => Ok(u16::from_be_bytes([hi, lo])),
            _ => Err(PlcError::invalid_response(
                "setup communication parameters truncated",
            )),
        }
    }

    /// Payload of the single item of a read-var acknowledge.
    ///
    /// # Errors
    ///
    /// `PlcError::AccessRejected` if the item return code is not success.
    pub fn read_item(&self) -> Result<&[u8]> {
        let head = self
            .data
            .get(..4)
            .ok_or_else(|| PlcError::invalid_response("read item header truncated"))?;
        if head[0] != S7_RETURN_SUCCESS {
            return Err(PlcError::AccessRejected {
                return_code: head[0],
            });
        }
        let length = usize::from(u16::from_be_bytes([head[2], head[3]]));
        // BIT, BYTE/WORD/DWORD and INT transports count bits
        let bytes = match head[1] {
            0x03..=0x05 => length.div_ceil(8),
            _ => length,
        };
        self.data
            .get(4..4 + bytes)
            .ok_or_else(|| PlcError::invalid_response("read item payload truncated"))
    }

    /// Result of the single item of a write-var acknowledge.
    pub fn write_item(&self) -> Result<()> {
        match self.data.first() {
            Some(&S7_RETURN_SUCCESS) => Ok(()),
            Some(&return_code) => Err(PlcError::AccessRejected { return_code }),
            None => Err(PlcError::invalid_response("write item result missing")),
        }
    }
}
