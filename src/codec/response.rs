//! Response PDU encoding/decoding, matched against the `Request` that
//! produced it.
//!
//! A `Response` never carries an exception: exceptions are parsed out in
//! `decode` and surfaced as `Err(ModbusError::Modbus(code))`, mirroring how
//! `slowtec/tokio-modbus` keeps `Exception`/`ExceptionResponse` out of its
//! `Response` enum entirely.

use crate::codec::exception::ExceptionCode;
use crate::codec::request::Request;
use crate::error::{ModbusError, ModbusResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<bool>),
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleCoil { addr: u16, value: bool },
    WriteSingleRegister { addr: u16, value: u16 },
    WriteMultipleCoils { start: u16, qty: u16 },
    WriteMultipleRegisters { start: u16, qty: u16 },
    ReadWriteMultipleRegisters(Vec<u16>),
    ReadExceptionStatus(u8),
    Diagnostic { sub_function: u16, data: Vec<u8> },
}

impl Response {
    pub fn function_code(&self) -> u8 {
        match self {
            Response::ReadCoils(_) => crate::codec::request::FC_READ_COILS,
            Response::ReadDiscreteInputs(_) => crate::codec::request::FC_READ_DISCRETE_INPUTS,
            Response::ReadHoldingRegisters(_) => crate::codec::request::FC_READ_HOLDING_REGISTERS,
            Response::ReadInputRegisters(_) => crate::codec::request::FC_READ_INPUT_REGISTERS,
            Response::WriteSingleCoil { .. } => crate::codec::request::FC_WRITE_SINGLE_COIL,
            Response::WriteSingleRegister { .. } => crate::codec::request::FC_WRITE_SINGLE_REGISTER,
            Response::WriteMultipleCoils { .. } => crate::codec::request::FC_WRITE_MULTIPLE_COILS,
            Response::WriteMultipleRegisters { .. } => {
                crate::codec::request::FC_WRITE_MULTIPLE_REGISTERS
            }
            Response::ReadWriteMultipleRegisters(_) => {
                crate::codec::request::FC_READ_WRITE_MULTIPLE_REGISTERS
            }
            Response::ReadExceptionStatus(_) => crate::codec::request::FC_READ_EXCEPTION_STATUS,
            Response::Diagnostic { .. } => crate::codec::request::FC_DIAGNOSTIC,
        }
    }

    /// Encode a server-side response PDU (function code + body, no address
    /// or CRC/length framing).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.function_code()];
        match self {
            Response::ReadCoils(values) | Response::ReadDiscreteInputs(values) => {
                let packed = crate::codec::bits::pack_bits(values);
                buf.push(packed.len() as u8);
                buf.extend_from_slice(&packed);
            }
            Response::ReadHoldingRegisters(values)
            | Response::ReadInputRegisters(values)
            | Response::ReadWriteMultipleRegisters(values) => {
                buf.push((values.len() * 2) as u8);
                for v in values {
                    buf.extend_from_slice(&v.to_be_bytes());
                }
            }
            Response::WriteSingleCoil { addr, value } => {
                let wire: u16 = if *value { 0xFF00 } else { 0x0000 };
                buf.extend_from_slice(&addr.to_be_bytes());
                buf.extend_from_slice(&wire.to_be_bytes());
            }
            Response::WriteSingleRegister { addr, value } => {
                buf.extend_from_slice(&addr.to_be_bytes());
                buf.extend_from_slice(&value.to_be_bytes());
            }
            Response::WriteMultipleCoils { start, qty } | Response::WriteMultipleRegisters { start, qty } => {
                buf.extend_from_slice(&start.to_be_bytes());
                buf.extend_from_slice(&qty.to_be_bytes());
            }
            Response::ReadExceptionStatus(status) => {
                buf.push(*status);
            }
            Response::Diagnostic { sub_function, data } => {
                buf.extend_from_slice(&sub_function.to_be_bytes());
                buf.extend_from_slice(data);
            }
        }
        buf
    }

    /// Encode `fc | 0x80, code` for an exception response.
    pub fn encode_exception(function_code: u8, code: ExceptionCode) -> Vec<u8> {
        vec![function_code | 0x80, code.code()]
    }

    /// The raw response body (post function-code bytes) as it appeared, or
    /// would appear, on the wire. Kept for callers that need the exact
    /// echoed bytes of a write-single response rather than the decoded
    /// `(address, value)` pair.
    pub fn raw_body(&self) -> Vec<u8> {
        self.encode()[1..].to_vec()
    }

    /// Decode a response PDU received by a master, interpreting it in the
    /// context of the `Request` that was sent. An exception byte (high bit
    /// of the function code set) is surfaced as `Err`, never as a variant.
    pub fn decode(request: &Request, pdu: &[u8]) -> ModbusResult<Response> {
        let fc = *pdu
            .first()
            .ok_or_else(|| ModbusError::InvalidResponse("empty PDU".into()))?;

        if fc & 0x80 != 0 {
            let expected_fc = request.function_code() | 0x80;
            if fc != expected_fc {
                return Err(ModbusError::InvalidResponse(format!(
                    "exception function code {fc:#04x} does not match request {expected_fc:#04x}"
                )));
            }
            let code_byte = *pdu
                .get(1)
                .ok_or_else(|| ModbusError::InvalidResponse("truncated exception response".into()))?;
            let code = ExceptionCode::from_code(code_byte).ok_or_else(|| {
                ModbusError::InvalidResponse(format!("unknown exception code {code_byte}"))
            })?;
            return Err(ModbusError::Modbus(code));
        }

        if fc != request.function_code() {
            return Err(ModbusError::InvalidResponse(format!(
                "response function code {fc:#04x} does not match request {:#04x}",
                request.function_code()
            )));
        }

        let body = &pdu[1..];
        match request {
            Request::ReadCoils { qty, .. } => {
                let values = decode_bit_response(body, *qty)?;
                Ok(Response::ReadCoils(values))
            }
            Request::ReadDiscreteInputs { qty, .. } => {
                let values = decode_bit_response(body, *qty)?;
                Ok(Response::ReadDiscreteInputs(values))
            }
            Request::ReadHoldingRegisters { qty, .. } => {
                Ok(Response::ReadHoldingRegisters(decode_register_response(body, *qty)?))
            }
            Request::ReadInputRegisters { qty, .. } => {
                Ok(Response::ReadInputRegisters(decode_register_response(body, *qty)?))
            }
            Request::ReadWriteMultipleRegisters { read_qty, .. } => Ok(
                Response::ReadWriteMultipleRegisters(decode_register_response(body, *read_qty)?),
            ),
            Request::WriteSingleCoil { addr, value } => {
                let (echoed_addr, echoed_value) = read_echo_pair(body)?;
                if echoed_addr != *addr {
                    return Err(ModbusError::InvalidResponse(
                        "write single coil address mismatch".into(),
                    ));
                }
                let wire_value = echoed_value == 0xFF00;
                if wire_value != *value {
                    return Err(ModbusError::InvalidResponse(
                        "write single coil value mismatch".into(),
                    ));
                }
                Ok(Response::WriteSingleCoil {
                    addr: echoed_addr,
                    value: wire_value,
                })
            }
            Request::WriteSingleRegister { addr, value } => {
                let (echoed_addr, echoed_value) = read_echo_pair(body)?;
                if echoed_addr != *addr || echoed_value != *value {
                    return Err(ModbusError::InvalidResponse(
                        "write single register echo mismatch".into(),
                    ));
                }
                Ok(Response::WriteSingleRegister {
                    addr: echoed_addr,
                    value: echoed_value,
                })
            }
            Request::WriteMultipleCoils { start, values } => {
                let (echoed_start, echoed_qty) = read_echo_pair(body)?;
                if echoed_start != *start || echoed_qty as usize != values.len() {
                    return Err(ModbusError::InvalidResponse(
                        "write multiple coils echo mismatch".into(),
                    ));
                }
                Ok(Response::WriteMultipleCoils {
                    start: echoed_start,
                    qty: echoed_qty,
                })
            }
            Request::WriteMultipleRegisters { start, values } => {
                let (echoed_start, echoed_qty) = read_echo_pair(body)?;
                if echoed_start != *start || echoed_qty as usize != values.len() {
                    return Err(ModbusError::InvalidResponse(
                        "write multiple registers echo mismatch".into(),
                    ));
                }
                Ok(Response::WriteMultipleRegisters {
                    start: echoed_start,
                    qty: echoed_qty,
                })
            }
            Request::ReadExceptionStatus => {
                let status = *body
                    .first()
                    .ok_or_else(|| ModbusError::InvalidResponse("truncated exception status".into()))?;
                Ok(Response::ReadExceptionStatus(status))
            }
            Request::Diagnostic { .. } => {
                if body.len() < 2 {
                    return Err(ModbusError::InvalidResponse("truncated diagnostic response".into()));
                }
                let sub_function = u16::from_be_bytes([body[0], body[1]]);
                Ok(Response::Diagnostic {
                    sub_function,
                    data: body[2..].to_vec(),
                })
            }
        }
    }
}

fn read_echo_pair(body: &[u8]) -> ModbusResult<(u16, u16)> {
    if body.len() < 4 {
        return Err(ModbusError::InvalidResponse("truncated echo response".into()));
    }
    Ok((
        u16::from_be_bytes([body[0], body[1]]),
        u16::from_be_bytes([body[2], body[3]]),
    ))
}

fn decode_bit_response(body: &[u8], qty: u16) -> ModbusResult<Vec<bool>> {
    let byte_count = *body
        .first()
        .ok_or_else(|| ModbusError::InvalidResponse("truncated bit response".into()))?
        as usize;
    let data = body
        .get(1..1 + byte_count)
        .ok_or_else(|| ModbusError::InvalidResponse("bit response byte count mismatch".into()))?;
    if byte_count != (qty as usize).div_ceil(8) {
        return Err(ModbusError::InvalidResponse(
            "bit response byte count does not match requested quantity".into(),
        ));
    }
    Ok(crate::codec::bits::unpack_bits(data, qty as usize))
}

fn decode_register_response(body: &[u8], qty: u16) -> ModbusResult<Vec<u16>> {
    let byte_count = *body
        .first()
        .ok_or_else(|| ModbusError::InvalidResponse("truncated register response".into()))?
        as usize;
    if byte_count != qty as usize * 2 {
        return Err(ModbusError::InvalidResponse(
            "register response byte count does not match requested quantity".into(),
        ));
    }
    let data = body
        .get(1..1 + byte_count)
        .ok_or_else(|| ModbusError::InvalidResponse("register response byte count mismatch".into()))?;
    Ok(data
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_read_holding_registers_decodes_big_endian_words() {
        let request = Request::ReadHoldingRegisters { start: 0, qty: 1 };
        let pdu = [0x03, 0x02, 0x00, 0x2A];
        let response = Response::decode(&request, &pdu).unwrap();
        assert_eq!(response, Response::ReadHoldingRegisters(vec![42]));
    }

    #[test]
    fn decode_exception_response_surfaces_exception_code() {
        let request = Request::WriteSingleCoil { addr: 0, value: true };
        let pdu = [0x85, 0x03];
        let err = Response::decode(&request, &pdu).unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Modbus(ExceptionCode::IllegalDataValue)
        ));
    }

    #[test]
    fn decode_rejects_mismatched_function_code() {
        let request = Request::ReadHoldingRegisters { start: 0, qty: 1 };
        let pdu = [0x04, 0x02, 0x00, 0x2A];
        assert!(Response::decode(&request, &pdu).is_err());
    }

    #[test]
    fn decode_rejects_echo_mismatch() {
        let request = Request::WriteSingleRegister { addr: 5, value: 7 };
        let pdu = [0x06, 0x00, 0x05, 0x00, 0x08];
        assert!(Response::decode(&request, &pdu).is_err());
    }

    #[test]
    fn encode_read_coils_response_round_trips() {
        let response = Response::ReadCoils(vec![true, false, true, true]);
        let encoded = response.encode();
        let request = Request::ReadCoils { start: 0, qty: 4 };
        let decoded = Response::decode(&request, &encoded).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn encode_exception_sets_high_bit() {
        let encoded = Response::encode_exception(0x03, ExceptionCode::IllegalDataAddress);
        assert_eq!(encoded, vec![0x83, 0x02]);
    }

    #[test]
    fn write_multiple_registers_echo_roundtrips() {
        let request = Request::WriteMultipleRegisters {
            start: 10,
            values: vec![1, 2, 3],
        };
        let response = Response::WriteMultipleRegisters { start: 10, qty: 3 };
        let encoded = response.encode();
        assert_eq!(Response::decode(&request, &encoded).unwrap(), response);
    }
}
