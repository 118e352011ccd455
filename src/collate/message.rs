//! Collation header and gzip helpers.
//!
//! The payload of a collated packet starts with this 8-byte header:
//!
//! ```text
//! ┌───────────┬───────────┬────────────────────┬──────────────────────────┐
//! │ Flags     │ Reserved  │ Uncompressed bytes │ Inner packets (maybe gz) │
//! │ uint16 BE │ uint16 BE │ uint32 BE          │ ...                      │
//! └───────────┴───────────┴────────────────────┴──────────────────────────┘
//! ```

use std::io::{Read, Write};

use bytes::BufMut;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, TesError};
use crate::protocol::WireScalar;

/// Collation header size in bytes.
pub const COLLATION_HEADER_SIZE: usize = 8;

/// Collation flag constants.
pub mod collation_flags {
    /// Inner packet bytes are gzip compressed.
    pub const GZIP_COMPRESSED: u16 = 0b1;
}

/// Header at the start of every collated packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollationHeader {
    /// See [`collation_flags`].
    pub flags: u16,
    /// Always zero on write.
    pub reserved: u16,
    /// Size of the inner packet run before compression.
    pub uncompressed_bytes: u32,
}

impl CollationHeader {
    /// Check if the body is gzip compressed.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.flags & collation_flags::GZIP_COMPRESSED != 0
    }

    /// Append the encoded header to `buf`.
    pub fn put<B: BufMut>(&self, buf: &mut B) {
        self.flags.put(buf);
        self.reserved.put(buf);
        self.uncompressed_bytes.put(buf);
    }

    /// Decode the header from the start of a collated payload.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < COLLATION_HEADER_SIZE {
            return Err(TesError::InsufficientData {
                needed: COLLATION_HEADER_SIZE,
                available: buf.len(),
            });
        }
        Ok(Self {
            flags: u16::get(&mut buf),
            reserved: u16::get(&mut buf),
            uncompressed_bytes: u32::get(&mut buf),
        })
    }
}

/// Gzip `bytes` at `level` (clamped to 0-9).
pub fn gzip(bytes: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(bytes.len() / 2),
        Compression::new(level.min(9)),
    );
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Inflate a gzip body that must expand to exactly `expected` bytes.
///
/// Reads at most one byte past `expected` so a corrupt body cannot inflate
/// without bound.
pub fn gunzip(bytes: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    GzDecoder::new(bytes)
        .take(expected as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| TesError::DecompressionFailure(e.to_string()))?;

    if out.len() != expected {
        return Err(TesError::DecompressionFailure(format!(
            "inflated to {} bytes, header declares {}",
            out.len(),
            expected
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = CollationHeader {
            flags: collation_flags::GZIP_COMPRESSED,
            reserved: 0,
            uncompressed_bytes: 0x0102_0304,
        };
        let mut buf = Vec::new();
        header.put(&mut buf);

        assert_eq!(buf, vec![0, 1, 0, 0, 1, 2, 3, 4]);
        assert_eq!(CollationHeader::decode(&buf).unwrap(), header);
        assert!(header.is_compressed());
    }

    #[test]
    fn test_header_truncated() {
        let result = CollationHeader::decode(&[0, 1, 0]);
        assert!(matches!(result, Err(TesError::InsufficientData { .. })));
    }

    #[test]
    fn test_gzip_roundtrip() {
        let data: Vec<u8> = (0..4096u32).flat_map(|i| (i % 17).to_be_bytes()).collect();
        let compressed = gzip(&data, 6).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(&compressed[..2], &[0x1F, 0x8B]);
        assert_eq!(gunzip(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_gunzip_length_mismatch() {
        let compressed = gzip(b"twelve bytes", 6).unwrap();
        assert!(matches!(
            gunzip(&compressed, 11),
            Err(TesError::DecompressionFailure(_))
        ));
        assert!(matches!(
            gunzip(&compressed, 13),
            Err(TesError::DecompressionFailure(_))
        ));
    }

    #[test]
    fn test_gunzip_corrupt_body() {
        let mut compressed = gzip(&[7u8; 1000], 6).unwrap();
        let mid = compressed.len() / 2;
        compressed[mid] ^= 0xFF;
        compressed.truncate(mid + 1);
        assert!(matches!(
            gunzip(&compressed, 1000),
            Err(TesError::DecompressionFailure(_))
        ));
    }
}
