//! MBAP header packing/unpacking and transaction-id allocation.

use std::sync::atomic::{AtomicU16, Ordering};

use crate::error::{ModbusError, ModbusResult};

pub const MBAP_HEADER_LEN: usize = 7;
const PROTOCOL_ID: u16 = 0;

/// Per-master, process-wide-within-that-master transaction id counter.
/// Not a single global: a process may host more than one independent
/// `Master`, each needing its own sequence.
#[derive(Debug, Default)]
pub struct TransactionIdGenerator {
    next: AtomicU16,
}

impl TransactionIdGenerator {
    pub fn new() -> TransactionIdGenerator {
        TransactionIdGenerator { next: AtomicU16::new(0) }
    }

    pub fn next(&self) -> u16 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// A parsed 7-byte MBAP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

/// Build `transaction_id(2) | protocol_id(2)=0 | length(2) | unit_id(1) |
/// pdu` for a master request or server response.
pub fn pack(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let length = (1 + pdu.len()) as u16;
    let mut buf = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    buf.extend_from_slice(&transaction_id.to_be_bytes());
    buf.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    buf.extend_from_slice(&length.to_be_bytes());
    buf.push(unit_id);
    buf.extend_from_slice(pdu);
    buf
}

/// Parse the 7-byte header alone (used by the server, which reads the
/// header before knowing how many more bytes to read for the PDU).
pub fn parse_header(header: &[u8]) -> ModbusResult<MbapHeader> {
    if header.len() != MBAP_HEADER_LEN {
        return Err(ModbusError::InvalidMbap(format!(
            "header must be {MBAP_HEADER_LEN} bytes, got {}",
            header.len()
        )));
    }
    let transaction_id = u16::from_be_bytes([header[0], header[1]]);
    let protocol_id = u16::from_be_bytes([header[2], header[3]]);
    let length = u16::from_be_bytes([header[4], header[5]]);
    let unit_id = header[6];
    if protocol_id != PROTOCOL_ID {
        return Err(ModbusError::InvalidMbap(format!(
            "protocol id must be 0, got {protocol_id}"
        )));
    }
    Ok(MbapHeader {
        transaction_id,
        protocol_id,
        length,
        unit_id,
    })
}

/// Parse a full frame (header + PDU) as received by a server: returns the
/// header and the PDU slice.
pub fn parse_frame(frame: &[u8]) -> ModbusResult<(MbapHeader, &[u8])> {
    if frame.len() < MBAP_HEADER_LEN {
        return Err(ModbusError::InvalidMbap("frame shorter than header".into()));
    }
    let header = parse_header(&frame[..MBAP_HEADER_LEN])?;
    let pdu = &frame[MBAP_HEADER_LEN..];
    if header.length as usize != 1 + pdu.len() {
        return Err(ModbusError::InvalidMbap(format!(
            "length field {} does not match 1 + pdu length {}",
            header.length,
            pdu.len()
        )));
    }
    Ok((header, pdu))
}

/// Validate a response header against the request that produced it and
/// return the response PDU.
pub fn parse_response(
    expected_transaction_id: u16,
    expected_unit_id: u8,
    frame: &[u8],
) -> ModbusResult<Vec<u8>> {
    let (header, pdu) = parse_frame(frame)?;
    if header.transaction_id != expected_transaction_id {
        return Err(ModbusError::InvalidMbap(format!(
            "transaction id {} does not match request {}",
            header.transaction_id, expected_transaction_id
        )));
    }
    if header.unit_id != expected_unit_id {
        return Err(ModbusError::InvalidMbap(format!(
            "unit id {} does not match request {}",
            header.unit_id, expected_unit_id
        )));
    }
    Ok(pdu.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_parse_round_trips() {
        let pdu = vec![0x03, 0x00, 0x00, 0x00, 0x0A];
        let frame = pack(42, 1, &pdu);
        let (header, parsed_pdu) = parse_frame(&frame).unwrap();
        assert_eq!(header.transaction_id, 42);
        assert_eq!(header.unit_id, 1);
        assert_eq!(parsed_pdu, pdu.as_slice());
    }

    #[test]
    fn parse_response_matches_transaction_and_unit() {
        let pdu = vec![0x03, 0x02, 0x00, 0x2A];
        let frame = pack(7, 1, &pdu);
        assert_eq!(parse_response(7, 1, &frame).unwrap(), pdu);
        assert!(parse_response(8, 1, &frame).is_err());
        assert!(parse_response(7, 2, &frame).is_err());
    }

    #[test]
    fn parse_header_rejects_nonzero_protocol_id() {
        let mut header = pack(1, 1, &[0x03]);
        header[2] = 0x00;
        header[3] = 0x01;
        assert!(parse_header(&header[..MBAP_HEADER_LEN]).is_err());
    }

    #[test]
    fn transaction_id_generator_wraps_and_is_distinct_per_call() {
        let gen = TransactionIdGenerator::new();
        let ids: Vec<u16> = (0..10).map(|_| gen.next()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 10);
    }

    #[test]
    fn parse_frame_rejects_length_mismatch() {
        let mut frame = pack(1, 1, &[0x03, 0x00]);
        frame[5] = 0xFF;
        assert!(parse_frame(&frame).is_err());
    }
}
