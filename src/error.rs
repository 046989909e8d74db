//! Error types for PLC communication.

use std::io;
use thiserror::Error;

/// Result type alias for PLC operations.
pub type Result<T> = std::result::Result<T, PlcError>;

/// Errors that can occur while addressing, encoding or exchanging PLC data.
#[derive(Debug, Error)]
pub enum PlcError {
    /// A stream was accessed while the connection was not established.
    #[error("connection does not exist")]
    NotConnected,

    /// The PLC did not answer within the wait budget.
    #[error("Communication timeout: {reason}")]
    Timeout {
        /// Which wait expired.
        reason: String,
    },

    /// The response carried a function code other than the expected one.
    ///
    /// MODBUS signals vendor errors this way; the byte following the function
    /// code is then an error code rather than a byte count.
    #[error("Invalid response function code 0x{function_code:02X} (error code {error_code})")]
    InvalidFunctionCode {
        /// Function code found in the response.
        function_code: u8,
        /// Byte following the function code.
        error_code: u8,
    },

    /// Malformed response envelope.
    #[error("Invalid response: {reason}")]
    InvalidResponse {
        /// Description of the framing error.
        reason: String,
    },

    /// The PLC rejected the ISO transport connection.
    #[error("Connection refused by PLC: {reason}")]
    ConnectionRefused {
        /// Description of the refusal.
        reason: String,
    },

    /// The S7 job header reported an error.
    #[error("PLC rejected job: error class 0x{error_class:02X}, error code 0x{error_code:02X}")]
    JobRejected {
        /// S7 error class.
        error_class: u8,
        /// S7 error code.
        error_code: u8,
    },

    /// The S7 data item carried a return code other than success.
    #[error("PLC rejected data access: return code 0x{return_code:02X}")]
    AccessRejected {
        /// S7 item return code.
        return_code: u8,
    },

    /// The address cannot be mapped for the requested operation.
    #[error("Invalid addressing: {reason}")]
    InvalidAddressing {
        /// Description of the addressing error.
        reason: String,
    },

    /// A value lies outside the representable range of its data type.
    #[error("Value out of range: {reason}")]
    ValueOutOfRange {
        /// Description of the range violation.
        reason: String,
    },

    /// A buffer access would touch bytes past the end of the buffer.
    #[error("Byte index {index} (width {width}) out of range for buffer of {len} bytes")]
    IndexOutOfRange {
        /// First byte accessed.
        index: usize,
        /// Number of bytes accessed.
        width: usize,
        /// Buffer length.
        len: usize,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for PlcError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout {
                reason: format!("socket read timed out ({err})"),
            },
            _ => Self::Io(err),
        }
    }
}

impl PlcError {
    /// Creates a new `Timeout` error.
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::Timeout {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidResponse` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plclink::PlcError;
    ///
    /// let err = PlcError::invalid_response("protocol id 7");
    /// assert_eq!(err.to_string(), "Invalid response: protocol id 7");
    /// ```
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Creates a new `ConnectionRefused` error.
    pub fn connection_refused(reason: impl Into<String>) -> Self {
        Self::ConnectionRefused {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidAddressing` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plclink::PlcError;
    ///
    /// let err = PlcError::invalid_addressing("bit index 9 not in 0..7");
    /// ```
    pub fn invalid_addressing(reason: impl Into<String>) -> Self {
        Self::InvalidAddressing {
            reason: reason.into(),
        }
    }

    /// Creates a new `ValueOutOfRange` error.
    pub fn value_out_of_range(reason: impl Into<String>) -> Self {
        Self::ValueOutOfRange {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Returns whether the error leaves the connection unreliable for the
    /// remainder of the current drain.
    ///
    /// Addressing, range and parameter errors are the caller's fault and say
    /// nothing about the state of the wire.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::Timeout { .. }
                | Self::InvalidFunctionCode { .. }
                | Self::InvalidResponse { .. }
                | Self::ConnectionRefused { .. }
                | Self::Io(_)
        )
    }
}
