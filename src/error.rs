//! Unified error type for the Modbus stack
//!
//! Mirrors the error taxonomy of the protocol itself: wire-level framing
//! failures, decoded slave exceptions, and host-API misuse of the databank
//! are kept as distinct variants so callers can match on the kind of
//! failure rather than parsing a message string.

use thiserror::Error;

use crate::codec::exception::ExceptionCode;

/// Result type alias used throughout the crate.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors produced by the master engine, the databank, or the codec.
#[derive(Error, Debug)]
pub enum ModbusError {
    /// The slave answered with an exception response.
    #[error("slave returned exception: {0}")]
    Modbus(#[from] ExceptionCode),

    /// The master was asked to encode a function code it does not support.
    #[error("function code {0} is not supported")]
    FunctionNotSupported(u8),

    /// A host-API parameter was out of range (slave id, block size, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `add_block` was called with a malformed definition.
    #[error("invalid block definition: {0}")]
    InvalidModbusBlock(String),

    /// A block or slave name that must be unique was already registered.
    #[error("duplicated key: {0}")]
    DuplicatedKey(String),

    /// A lookup by name or unit id found nothing.
    #[error("missing key: {0}")]
    MissingKey(String),

    /// A new block would overlap an existing block in the same space.
    #[error("block {new} overlaps existing block {existing} in the same address space")]
    OverlapModbusBlock { new: String, existing: String },

    /// A read or write range fell outside the addressed block.
    #[error("address range [{start}, {end}) is out of block {block} bounds")]
    OutOfModbusBlock {
        block: String,
        start: u16,
        end: u32,
    },

    /// A request PDU was structurally malformed or violated protocol rules
    /// that are not modeled as a Modbus exception (e.g. a broadcast read).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A response PDU failed validation (CRC, length, echoed address, ...).
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// An MBAP header failed to match the outstanding request.
    #[error("invalid MBAP header: {0}")]
    InvalidMbap(String),

    /// The master's receive timeout elapsed before a full frame arrived.
    #[error("timed out waiting for a response")]
    Timeout,

    /// The transport is not open (or was closed after a failed send).
    #[error("transport not connected")]
    NotConnected,

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port configuration or open failure.
    #[error("serial port error: {0}")]
    SerialPort(#[from] tokio_serial::Error),

    /// Failure loading/saving a YAML `DatabankConfig` or CSV snapshot.
    #[error("configuration error: {0}")]
    Config(String),

    /// `start()` called on a server that is already running.
    #[error("server already running")]
    AlreadyRunning,

    /// `stop()` called on a server that is not running.
    #[error("server not running")]
    NotRunning,

    /// The server failed to bind its listening socket or serial port.
    #[error("failed to bind: {0}")]
    BindFailed(String),

    /// `stop()` did not observe the run loop exit within its grace period.
    #[error("server shutdown timed out")]
    ShutdownTimeout,
}

impl From<serde_yaml::Error> for ModbusError {
    fn from(err: serde_yaml::Error) -> Self {
        ModbusError::Config(format!("YAML error: {err}"))
    }
}

impl From<csv::Error> for ModbusError {
    fn from(err: csv::Error) -> Self {
        ModbusError::Config(format!("CSV error: {err}"))
    }
}

impl ModbusError {
    /// The Modbus exception code this error should be reported to the wire
    /// as, if it originates on the server side and is not already an
    /// exception response itself.
    pub fn as_exception_code(&self) -> Option<ExceptionCode> {
        match self {
            ModbusError::Modbus(code) => Some(*code),
            ModbusError::MissingKey(_) | ModbusError::OutOfModbusBlock { .. } => {
                Some(ExceptionCode::IllegalDataAddress)
            }
            ModbusError::InvalidModbusBlock(_) | ModbusError::InvalidArgument(_) => {
                Some(ExceptionCode::IllegalDataValue)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modbus_exception_roundtrips_to_code() {
        let err = ModbusError::Modbus(ExceptionCode::IllegalDataAddress);
        assert_eq!(err.as_exception_code(), Some(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn missing_key_maps_to_illegal_address() {
        let err = ModbusError::MissingKey("holding_regs".into());
        assert_eq!(err.as_exception_code(), Some(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn io_error_has_no_exception_mapping() {
        let err = ModbusError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.as_exception_code(), None);
    }
}
