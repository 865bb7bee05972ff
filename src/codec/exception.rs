//! Modbus exception codes.

use thiserror::Error;

/// The second byte of an exception response (`fc | 0x80, code`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    #[error("illegal function")]
    IllegalFunction = 1,
    #[error("illegal data address")]
    IllegalDataAddress = 2,
    #[error("illegal data value")]
    IllegalDataValue = 3,
    #[error("slave device failure")]
    SlaveDeviceFailure = 4,
    #[error("acknowledge")]
    Acknowledge = 5,
    #[error("slave device busy")]
    SlaveDeviceBusy = 6,
    #[error("memory parity error")]
    MemoryParityError = 8,
}

impl ExceptionCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::IllegalFunction),
            2 => Some(Self::IllegalDataAddress),
            3 => Some(Self::IllegalDataValue),
            4 => Some(Self::SlaveDeviceFailure),
            5 => Some(Self::Acknowledge),
            6 => Some(Self::SlaveDeviceBusy),
            8 => Some(Self::MemoryParityError),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrips() {
        for code in [1u8, 2, 3, 4, 5, 6, 8] {
            let exc = ExceptionCode::from_code(code).unwrap();
            assert_eq!(exc.code(), code);
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(ExceptionCode::from_code(7), None);
        assert_eq!(ExceptionCode::from_code(9), None);
    }
}
