//! Request PDU encoding as a closed sum type.
//!
//! Modeling requests as an enum instead of a name->handler table makes the
//! function-code space exhaustively checkable: the dispatcher match in
//! `crate::dispatch` and the encoder match below are both compiler-verified
//! to cover every variant.

use crate::codec::bits::pack_bits;
use crate::error::{ModbusError, ModbusResult};

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_READ_EXCEPTION_STATUS: u8 = 0x07;
pub const FC_DIAGNOSTIC: u8 = 0x08;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const FC_READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;

const COIL_WRITE_ON: u16 = 0xFF00;
const COIL_WRITE_OFF: u16 = 0x0000;

/// A decoded or about-to-be-encoded Modbus request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { start: u16, qty: u16 },
    ReadDiscreteInputs { start: u16, qty: u16 },
    ReadHoldingRegisters { start: u16, qty: u16 },
    ReadInputRegisters { start: u16, qty: u16 },
    WriteSingleCoil { addr: u16, value: bool },
    WriteSingleRegister { addr: u16, value: u16 },
    WriteMultipleCoils { start: u16, values: Vec<bool> },
    WriteMultipleRegisters { start: u16, values: Vec<u16> },
    ReadWriteMultipleRegisters {
        read_start: u16,
        read_qty: u16,
        write_start: u16,
        write_values: Vec<u16>,
    },
    ReadExceptionStatus,
    Diagnostic { sub_function: u16, data: Vec<u8> },
}

impl Request {
    pub fn function_code(&self) -> u8 {
        match self {
            Request::ReadCoils { .. } => FC_READ_COILS,
            Request::ReadDiscreteInputs { .. } => FC_READ_DISCRETE_INPUTS,
            Request::ReadHoldingRegisters { .. } => FC_READ_HOLDING_REGISTERS,
            Request::ReadInputRegisters { .. } => FC_READ_INPUT_REGISTERS,
            Request::WriteSingleCoil { .. } => FC_WRITE_SINGLE_COIL,
            Request::WriteSingleRegister { .. } => FC_WRITE_SINGLE_REGISTER,
            Request::WriteMultipleCoils { .. } => FC_WRITE_MULTIPLE_COILS,
            Request::WriteMultipleRegisters { .. } => FC_WRITE_MULTIPLE_REGISTERS,
            Request::ReadWriteMultipleRegisters { .. } => FC_READ_WRITE_MULTIPLE_REGISTERS,
            Request::ReadExceptionStatus => FC_READ_EXCEPTION_STATUS,
            Request::Diagnostic { .. } => FC_DIAGNOSTIC,
        }
    }

    /// Whether this request reads data from the slave. Broadcast reads are
    /// rejected by the master and by the server dispatcher, since a reply
    /// to a broadcast address has nowhere to go.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Request::ReadCoils { .. }
                | Request::ReadDiscreteInputs { .. }
                | Request::ReadHoldingRegisters { .. }
                | Request::ReadInputRegisters { .. }
                | Request::ReadExceptionStatus
                | Request::ReadWriteMultipleRegisters { .. }
        )
    }

    /// Encode the request PDU, validating the per-function quantity and
    /// length limits from the Modbus spec. Returns `IllegalDataValue`-shaped
    /// errors as `ModbusError::InvalidRequest` since this check happens
    /// before any wire traffic, not as a decoded exception.
    pub fn encode(&self) -> ModbusResult<Vec<u8>> {
        let mut buf = vec![self.function_code()];
        match self {
            Request::ReadCoils { start, qty } | Request::ReadDiscreteInputs { start, qty } => {
                check_qty(*qty, 1, 2000)?;
                buf.extend_from_slice(&start.to_be_bytes());
                buf.extend_from_slice(&qty.to_be_bytes());
            }
            Request::ReadHoldingRegisters { start, qty }
            | Request::ReadInputRegisters { start, qty } => {
                check_qty(*qty, 1, 125)?;
                buf.extend_from_slice(&start.to_be_bytes());
                buf.extend_from_slice(&qty.to_be_bytes());
            }
            Request::WriteSingleCoil { addr, value } => {
                let wire = if *value { COIL_WRITE_ON } else { COIL_WRITE_OFF };
                buf.extend_from_slice(&addr.to_be_bytes());
                buf.extend_from_slice(&wire.to_be_bytes());
            }
            Request::WriteSingleRegister { addr, value } => {
                buf.extend_from_slice(&addr.to_be_bytes());
                buf.extend_from_slice(&value.to_be_bytes());
            }
            Request::WriteMultipleCoils { start, values } => {
                check_qty(values.len() as u16, 1, 1968)?;
                let packed = pack_bits(values);
                buf.extend_from_slice(&start.to_be_bytes());
                buf.extend_from_slice(&(values.len() as u16).to_be_bytes());
                buf.push(packed.len() as u8);
                buf.extend_from_slice(&packed);
            }
            Request::WriteMultipleRegisters { start, values } => {
                check_qty(values.len() as u16, 1, 123)?;
                buf.extend_from_slice(&start.to_be_bytes());
                buf.extend_from_slice(&(values.len() as u16).to_be_bytes());
                buf.push((values.len() * 2) as u8);
                for v in values {
                    buf.extend_from_slice(&v.to_be_bytes());
                }
            }
            Request::ReadWriteMultipleRegisters {
                read_start,
                read_qty,
                write_start,
                write_values,
            } => {
                check_qty(*read_qty, 1, 125)?;
                check_qty(write_values.len() as u16, 1, 121)?;
                buf.extend_from_slice(&read_start.to_be_bytes());
                buf.extend_from_slice(&read_qty.to_be_bytes());
                buf.extend_from_slice(&write_start.to_be_bytes());
                buf.extend_from_slice(&(write_values.len() as u16).to_be_bytes());
                buf.push((write_values.len() * 2) as u8);
                for v in write_values {
                    buf.extend_from_slice(&v.to_be_bytes());
                }
            }
            Request::ReadExceptionStatus => {}
            Request::Diagnostic { sub_function, data } => {
                buf.extend_from_slice(&sub_function.to_be_bytes());
                buf.extend_from_slice(data);
            }
        }
        Ok(buf)
    }

    /// Decode a request PDU (function code + body) as received by a server.
    pub fn decode(pdu: &[u8]) -> ModbusResult<Request> {
        let fc = *pdu
            .first()
            .ok_or_else(|| ModbusError::InvalidRequest("empty PDU".into()))?;
        let body = &pdu[1..];

        let read_pair = |body: &[u8]| -> ModbusResult<(u16, u16)> {
            if body.len() < 4 {
                return Err(ModbusError::InvalidRequest(format!(
                    "function {fc} body too short: {} bytes",
                    body.len()
                )));
            }
            let start = u16::from_be_bytes([body[0], body[1]]);
            let qty = u16::from_be_bytes([body[2], body[3]]);
            Ok((start, qty))
        };

        let request = match fc {
            FC_READ_COILS => {
                let (start, qty) = read_pair(body)?;
                Ok(Request::ReadCoils { start, qty })
            }
            FC_READ_DISCRETE_INPUTS => {
                let (start, qty) = read_pair(body)?;
                Ok(Request::ReadDiscreteInputs { start, qty })
            }
            FC_READ_HOLDING_REGISTERS => {
                let (start, qty) = read_pair(body)?;
                Ok(Request::ReadHoldingRegisters { start, qty })
            }
            FC_READ_INPUT_REGISTERS => {
                let (start, qty) = read_pair(body)?;
                Ok(Request::ReadInputRegisters { start, qty })
            }
            FC_WRITE_SINGLE_COIL => {
                let (addr, value) = read_pair(body)?;
                if value != COIL_WRITE_ON && value != COIL_WRITE_OFF {
                    return Err(ModbusError::Modbus(
                        crate::codec::exception::ExceptionCode::IllegalDataValue,
                    ));
                }
                Ok(Request::WriteSingleCoil {
                    addr,
                    value: value == COIL_WRITE_ON,
                })
            }
            FC_WRITE_SINGLE_REGISTER => {
                let (addr, value) = read_pair(body)?;
                Ok(Request::WriteSingleRegister { addr, value })
            }
            FC_WRITE_MULTIPLE_COILS => {
                if body.len() < 5 {
                    return Err(ModbusError::InvalidRequest("WMC body too short".into()));
                }
                let start = u16::from_be_bytes([body[0], body[1]]);
                let qty = u16::from_be_bytes([body[2], body[3]]);
                let byte_count = body[4] as usize;
                let packed = body
                    .get(5..5 + byte_count)
                    .ok_or_else(|| ModbusError::InvalidRequest("WMC byte count mismatch".into()))?;
                let values = crate::codec::bits::unpack_bits(packed, qty as usize);
                Ok(Request::WriteMultipleCoils { start, values })
            }
            FC_WRITE_MULTIPLE_REGISTERS => {
                if body.len() < 5 {
                    return Err(ModbusError::InvalidRequest("WMR body too short".into()));
                }
                let start = u16::from_be_bytes([body[0], body[1]]);
                let qty = u16::from_be_bytes([body[2], body[3]]);
                let byte_count = body[4] as usize;
                if byte_count != qty as usize * 2 {
                    return Err(ModbusError::Modbus(
                        crate::codec::exception::ExceptionCode::IllegalDataValue,
                    ));
                }
                let reg_bytes = body
                    .get(5..5 + byte_count)
                    .ok_or_else(|| ModbusError::InvalidRequest("WMR byte count mismatch".into()))?;
                let values = reg_bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                Ok(Request::WriteMultipleRegisters { start, values })
            }
            FC_READ_WRITE_MULTIPLE_REGISTERS => {
                if body.len() < 9 {
                    return Err(ModbusError::InvalidRequest("RWMR body too short".into()));
                }
                let read_start = u16::from_be_bytes([body[0], body[1]]);
                let read_qty = u16::from_be_bytes([body[2], body[3]]);
                let write_start = u16::from_be_bytes([body[4], body[5]]);
                let write_qty = u16::from_be_bytes([body[6], body[7]]);
                let byte_count = body[8] as usize;
                if byte_count != write_qty as usize * 2 {
                    return Err(ModbusError::Modbus(
                        crate::codec::exception::ExceptionCode::IllegalDataValue,
                    ));
                }
                let reg_bytes = body
                    .get(9..9 + byte_count)
                    .ok_or_else(|| ModbusError::InvalidRequest("RWMR byte count mismatch".into()))?;
                let write_values = reg_bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                Ok(Request::ReadWriteMultipleRegisters {
                    read_start,
                    read_qty,
                    write_start,
                    write_values,
                })
            }
            FC_READ_EXCEPTION_STATUS => Ok(Request::ReadExceptionStatus),
            FC_DIAGNOSTIC => {
                if body.len() < 2 {
                    return Err(ModbusError::InvalidRequest("diagnostic body too short".into()));
                }
                let sub_function = u16::from_be_bytes([body[0], body[1]]);
                Ok(Request::Diagnostic {
                    sub_function,
                    data: body[2..].to_vec(),
                })
            }
            other => Err(ModbusError::FunctionNotSupported(other)),
        }?;
        request.validate()?;
        Ok(request)
    }

    /// Validate the per-function quantity and count limits against an
    /// already-decoded request. `encode` enforces these while building a
    /// request; `decode` calls this separately since a request arriving
    /// off the wire is structurally well-formed without having gone
    /// through `encode`'s checks.
    pub fn validate(&self) -> ModbusResult<()> {
        match self {
            Request::ReadCoils { qty, .. } | Request::ReadDiscreteInputs { qty, .. } => {
                check_qty(*qty, 1, 2000)
            }
            Request::ReadHoldingRegisters { qty, .. } | Request::ReadInputRegisters { qty, .. } => {
                check_qty(*qty, 1, 125)
            }
            Request::WriteMultipleCoils { values, .. } => check_qty(values.len() as u16, 1, 1968),
            Request::WriteMultipleRegisters { values, .. } => check_qty(values.len() as u16, 1, 123),
            Request::ReadWriteMultipleRegisters {
                read_qty,
                write_values,
                ..
            } => {
                check_qty(*read_qty, 1, 125)?;
                check_qty(write_values.len() as u16, 1, 121)
            }
            Request::WriteSingleCoil { .. }
            | Request::WriteSingleRegister { .. }
            | Request::ReadExceptionStatus
            | Request::Diagnostic { .. } => Ok(()),
        }
    }

    /// The PDU length of the *response* this request expects, when it can
    /// be computed ahead of time from the request alone. Used by the RTU
    /// master to know how many bytes to wait for.
    pub fn expected_response_len(&self) -> Option<usize> {
        match self {
            Request::ReadCoils { qty, .. } | Request::ReadDiscreteInputs { qty, .. } => {
                Some(2 + (*qty as usize).div_ceil(8))
            }
            Request::ReadHoldingRegisters { qty, .. } | Request::ReadInputRegisters { qty, .. } => {
                Some(2 + 2 * (*qty as usize))
            }
            Request::WriteSingleCoil { .. } | Request::WriteSingleRegister { .. } => Some(5),
            Request::WriteMultipleCoils { .. } | Request::WriteMultipleRegisters { .. } => Some(5),
            Request::ReadWriteMultipleRegisters { read_qty, .. } => {
                Some(2 + 2 * (*read_qty as usize))
            }
            Request::ReadExceptionStatus => Some(2),
            Request::Diagnostic { .. } => None,
        }
    }
}

fn check_qty(qty: u16, min: u16, max: u16) -> ModbusResult<()> {
    if qty < min || qty > max {
        return Err(ModbusError::Modbus(
            crate::codec::exception::ExceptionCode::IllegalDataValue,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_holding_registers_happy_path_encodes_start_and_qty() {
        let req = Request::ReadHoldingRegisters { start: 0, qty: 100 };
        assert_eq!(req.encode().unwrap(), vec![0x03, 0x00, 0x00, 0x00, 0x64]);
    }

    #[test]
    fn read_coils_quantity_limits() {
        assert!(Request::ReadCoils { start: 0, qty: 0 }.encode().is_err());
        assert!(Request::ReadCoils { start: 0, qty: 2000 }.encode().is_ok());
        assert!(Request::ReadCoils { start: 0, qty: 2001 }.encode().is_err());
    }

    #[test]
    fn read_holding_registers_quantity_limits() {
        assert!(Request::ReadHoldingRegisters { start: 0, qty: 125 }.encode().is_ok());
        assert!(Request::ReadHoldingRegisters { start: 0, qty: 126 }.encode().is_err());
    }

    #[test]
    fn write_multiple_coils_packs_values_lsb_first() {
        let req = Request::WriteMultipleCoils {
            start: 0,
            values: vec![false, false, true, true, false, false, true, true],
        };
        assert_eq!(
            req.encode().unwrap(),
            vec![0x0F, 0x00, 0x00, 0x00, 0x08, 0x01, 0xCC]
        );
    }

    #[test]
    fn write_multiple_coils_quantity_limit() {
        assert!(Request::WriteMultipleCoils {
            start: 0,
            values: vec![true; 1968],
        }
        .encode()
        .is_ok());
        assert!(Request::WriteMultipleCoils {
            start: 0,
            values: vec![true; 1969],
        }
        .encode()
        .is_err());
    }

    #[test]
    fn write_single_coil_uses_ff00_or_0000() {
        let on = Request::WriteSingleCoil { addr: 0x10, value: true };
        assert_eq!(on.encode().unwrap(), vec![0x05, 0x00, 0x10, 0xFF, 0x00]);
        let off = Request::WriteSingleCoil { addr: 0x10, value: false };
        assert_eq!(off.encode().unwrap(), vec![0x05, 0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn decode_rejects_write_single_coil_invalid_value() {
        // coil values must be 0xFF00 or 0x0000 on the wire
        let pdu = [0x05, 0x00, 0x00, 0x00, 0x01];
        let err = Request::decode(&pdu).unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Modbus(crate::codec::exception::ExceptionCode::IllegalDataValue)
        ));
    }

    #[test]
    fn decode_read_holding_registers_roundtrips_with_encode() {
        let req = Request::ReadHoldingRegisters { start: 10, qty: 7 };
        let pdu = req.encode().unwrap();
        assert_eq!(Request::decode(&pdu).unwrap(), req);
    }

    #[test]
    fn decode_write_multiple_registers_roundtrips() {
        let req = Request::WriteMultipleRegisters {
            start: 5,
            values: vec![1, 2, 3],
        };
        let pdu = req.encode().unwrap();
        assert_eq!(Request::decode(&pdu).unwrap(), req);
    }

    #[test]
    fn decode_unknown_function_code_is_not_supported() {
        let err = Request::decode(&[0x99, 0x00]).unwrap_err();
        assert!(matches!(err, ModbusError::FunctionNotSupported(0x99)));
    }

    #[test]
    fn expected_response_len_for_reads() {
        assert_eq!(
            Request::ReadCoils { start: 0, qty: 2000 }.expected_response_len(),
            Some(2 + 250)
        );
        assert_eq!(
            Request::ReadHoldingRegisters { start: 0, qty: 100 }.expected_response_len(),
            Some(2 + 200)
        );
    }

    #[test]
    fn expected_response_len_for_writes_is_five() {
        assert_eq!(
            Request::WriteSingleRegister { addr: 0, value: 0 }.expected_response_len(),
            Some(5)
        );
        assert_eq!(
            Request::WriteMultipleRegisters { start: 0, values: vec![1] }.expected_response_len(),
            Some(5)
        );
    }
}
