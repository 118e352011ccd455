//! Packet integrity check.
//!
//! CRC-16/CCITT-FALSE: polynomial `0x1021`, initial value `0xFFFF`, no
//! reflection, no final xor. Check value for `b"123456789"` is `0x29B1`.
//! The `crc` crate catalogues this parameter set as `CRC_16_IBM_3740`.

use crc::{Crc, CRC_16_IBM_3740};

/// Size of the trailing CRC in bytes.
pub const CRC_SIZE: usize = 2;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the packet CRC over `bytes`.
#[inline]
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// Compute the CRC over several slices as if they were contiguous.
pub fn crc16_parts(parts: &[&[u8]]) -> u16 {
    let mut digest = CRC16.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_parts_match_contiguous() {
        let data = b"header bytes and payload";
        assert_eq!(crc16_parts(&[&data[..6], &data[6..]]), crc16(data));
        assert_eq!(crc16_parts(&[&data[..]]), crc16(data));
    }

    #[test]
    fn test_empty_input_is_initial_value() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_single_bit_flip_changes_crc() {
        let data = b"collated packet payload".to_vec();
        let original = crc16(&data);
        for bit in 0..data.len() * 8 {
            let mut flipped = data.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert_ne!(crc16(&flipped), original, "bit {} undetected", bit);
        }
    }
}
