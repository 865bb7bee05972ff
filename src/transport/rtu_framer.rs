//! RTU address + CRC framing: `address(1) | pdu | crc(2, little-endian)`.

use crate::crc::crc16;
use crate::error::{ModbusError, ModbusResult};

const MIN_FRAME_LEN: usize = 4; // address + 1-byte pdu + 2-byte crc

/// Prefix `address` and append the little-endian CRC-16 of `address | pdu`.
pub fn build_frame(address: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
    frame.push(address);
    frame.extend_from_slice(pdu);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Validate CRC and strip address/CRC, returning `(address, pdu)`.
pub fn parse_frame(frame: &[u8]) -> ModbusResult<(u8, Vec<u8>)> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(ModbusError::InvalidResponse(format!(
            "RTU frame shorter than {MIN_FRAME_LEN} bytes"
        )));
    }
    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let received_crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let computed_crc = crc16(body);
    if received_crc != computed_crc {
        return Err(ModbusError::InvalidResponse(format!(
            "RTU CRC mismatch: received {received_crc:#06x}, computed {computed_crc:#06x}"
        )));
    }
    let address = body[0];
    let pdu = body[1..].to_vec();
    Ok((address, pdu))
}

/// Master-side response validation: CRC, minimum length, and echoed
/// address must all check out against the request that was sent.
pub fn parse_response(expected_address: u8, frame: &[u8]) -> ModbusResult<Vec<u8>> {
    let (address, pdu) = parse_frame(frame)?;
    if address != expected_address {
        return Err(ModbusError::InvalidResponse(format!(
            "RTU response address {address} does not match request address {expected_address}"
        )));
    }
    Ok(pdu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_round_trips_for_every_address() {
        let pdu = vec![0x03, 0x00, 0x00, 0x00, 0x0A];
        for address in 0u8..=255 {
            let frame = build_frame(address, &pdu);
            let (parsed_addr, parsed_pdu) = parse_frame(&frame).unwrap();
            assert_eq!(parsed_addr, address);
            assert_eq!(parsed_pdu, pdu);
        }
    }

    #[test]
    fn build_frame_matches_known_crc_test_vector() {
        let pdu = vec![0x03, 0x00, 0x00, 0x00, 0x0A];
        let frame = build_frame(1, &pdu);
        assert_eq!(&frame[frame.len() - 2..], [0xC5, 0xCD]);
    }

    #[test]
    fn tampered_byte_fails_crc_check() {
        let pdu = vec![0x03, 0x00, 0x00, 0x00, 0x0A];
        let mut frame = build_frame(1, &pdu);
        frame[2] ^= 0xFF;
        assert!(parse_frame(&frame).is_err());
    }

    #[test]
    fn parse_response_rejects_wrong_echoed_address() {
        let pdu = vec![0x03, 0x02, 0x00, 0x2A];
        let frame = build_frame(2, &pdu);
        assert!(parse_response(1, &frame).is_err());
        assert!(parse_response(2, &frame).is_ok());
    }

    #[test]
    fn parse_frame_rejects_too_short_frame() {
        assert!(parse_frame(&[0x01, 0x02, 0x03]).is_err());
    }
}
