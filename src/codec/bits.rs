//! Bit-packing for coil and discrete-input payloads.
//!
//! Coil `i` of a group lives in bit `(i mod 8)` of byte `(i div 8)`; the
//! last byte is zero-padded in its unused high bits.

/// Pack a slice of booleans LSB-first into bytes.
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let byte_count = values.len().div_ceil(8);
    let mut bytes = vec![0u8; byte_count];
    for (i, &value) in values.iter().enumerate() {
        if value {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack `count` booleans LSB-first from `bytes`. Bits beyond the
/// provided bytes (padding) are treated as `false`.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| {
            let byte_idx = i / 8;
            let bit_idx = i % 8;
            bytes
                .get(byte_idx)
                .map(|b| (b >> bit_idx) & 1 == 1)
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_is_lsb_first() {
        // per the Modbus spec's coil-packing rule: [0,0,1,1,0,0,1,1] -> 0xCC
        let bits = [false, false, true, true, false, false, true, true];
        assert_eq!(pack_bits(&bits), vec![0xCC]);
    }

    #[test]
    fn pack_pads_partial_last_byte_with_zero() {
        let bits = [true, false, true];
        assert_eq!(pack_bits(&bits), vec![0b0000_0101]);
    }

    #[test]
    fn pack_byte_count_is_ceil_div_8() {
        for n in 0..=2000usize {
            let bits = vec![false; n];
            assert_eq!(pack_bits(&bits).len(), n.div_ceil(8));
        }
    }

    #[test]
    fn unpack_reverses_pack_for_any_length() {
        let pattern: Vec<bool> = (0..37).map(|i| i % 3 == 0).collect();
        let packed = pack_bits(&pattern);
        let unpacked = unpack_bits(&packed, pattern.len());
        assert_eq!(unpacked, pattern);
    }

    #[test]
    fn unpack_out_of_range_bits_default_false() {
        assert_eq!(unpack_bits(&[0xFF], 16), {
            let mut v = vec![true; 8];
            v.extend(vec![false; 8]);
            v
        });
    }
}
