//! Wire format encoding and decoding.
//!
//! Implements the 13-byte packet header:
//! ```text
//! ┌──────────┬───────┬───────┬──────────┬───────┬──────────┬──────────┐
//! │ Marker   │ Major │ Minor │ Payload  │ Flags │ Routing  │ Message  │
//! │ 4 bytes  │ 1 byte│ 1 byte│ 2 bytes  │ 1 byte│ 2 bytes  │ 2 bytes  │
//! │ uint32 BE│       │       │ uint16 BE│       │ uint16 BE│ uint16 BE│
//! └──────────┴───────┴───────┴──────────┴───────┴──────────┴──────────┘
//! ```
//!
//! The payload follows the header, then a 2-byte CRC unless
//! [`flags::NO_CRC`] is set. All multi-byte integers are Big Endian.

use bytes::BufMut;

use super::crc::CRC_SIZE;
use super::endian::WireScalar;
use crate::error::{Result, TesError};

/// Synchronisation marker at byte 0 of every packet.
pub const PACKET_MARKER: u32 = 0x03E5_5E30;

/// Marker size in bytes.
pub const MARKER_SIZE: usize = 4;

/// Protocol major version. Packets with another major version are rejected.
pub const VERSION_MAJOR: u8 = 0;

/// Protocol minor version. Any minor version is accepted on read.
pub const VERSION_MINOR: u8 = 2;

/// Header size in bytes (fixed, exactly 13).
pub const HEADER_SIZE: usize = 13;

/// Maximum payload bytes in one packet.
pub const MAX_PAYLOAD_SIZE: usize = 0xFF00;

/// Maximum encoded packet size: header, largest payload and CRC.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + CRC_SIZE;

/// Byte offset of the payload size field within the header.
pub const PAYLOAD_SIZE_OFFSET: usize = 6;

/// Byte offset of the flags field within the header.
pub const FLAGS_OFFSET: usize = 8;

/// Flag constants for the packet header.
pub mod flags {
    /// Packet carries no trailing CRC.
    pub const NO_CRC: u8 = 0b0000_0001;

    /// Reserved bits mask (bits 1-7).
    pub const RESERVED_MASK: u8 = 0b1111_1110;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Well known routing IDs.
///
/// Routing IDs below [`SHAPE_IDS_START`](routing::SHAPE_IDS_START) belong to
/// the core protocol. Shape handlers and user extensions live above it.
pub mod routing {
    /// Invalid/unset routing.
    pub const NULL: u16 = 0;
    /// Server information.
    pub const SERVER_INFO: u16 = 1;
    /// Control messages (frame end, coordinate frame, ...).
    pub const CONTROL: u16 = 2;
    /// Collated (and possibly compressed) packet bundle.
    pub const COLLATED_PACKET: u16 = 3;
    /// Mesh resources.
    pub const MESH: u16 = 4;
    /// Camera.
    pub const CAMERA: u16 = 5;
    /// Category names.
    pub const CATEGORY: u16 = 6;
    /// Materials.
    pub const MATERIAL: u16 = 7;
    /// First routing ID for shape handlers.
    pub const SHAPE_IDS_START: u16 = 64;
    /// First routing ID for user defined messages.
    pub const USER_ID_START: u16 = 2048;
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol major version.
    pub version_major: u8,
    /// Protocol minor version.
    pub version_minor: u8,
    /// Payload length in bytes.
    pub payload_size: u16,
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Message family (see `routing` module).
    pub routing_id: u16,
    /// Message within the routing family.
    pub message_id: u16,
}

impl PacketHeader {
    /// Create a header for the current protocol version with an empty payload.
    pub fn new(routing_id: u16, message_id: u16) -> Self {
        Self {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            payload_size: 0,
            flags: 0,
            routing_id,
            message_id,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use tes_wire::protocol::{PacketHeader, HEADER_SIZE};
    ///
    /// let header = PacketHeader::new(64, 1);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// assert_eq!(&bytes[..4], &[0x03, 0xE5, 0x5E, 0x30]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into the first `HEADER_SIZE` bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (13 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        let mut out = &mut buf[..HEADER_SIZE];
        self.put(&mut out);
    }

    /// Append the encoded header to `buf`.
    pub fn put<B: BufMut>(&self, buf: &mut B) {
        PACKET_MARKER.put(buf);
        self.version_major.put(buf);
        self.version_minor.put(buf);
        self.payload_size.put(buf);
        self.flags.put(buf);
        self.routing_id.put(buf);
        self.message_id.put(buf);
    }

    /// Decode and validate a header from the start of `buf`.
    ///
    /// # Errors
    ///
    /// - `InsufficientData` if fewer than `HEADER_SIZE` bytes are given.
    /// - `MalformedHeader` on a bad marker, a foreign major version, reserved
    ///   flag bits or a payload size above `MAX_PAYLOAD_SIZE`.
    ///
    /// # Example
    ///
    /// ```
    /// use tes_wire::protocol::PacketHeader;
    ///
    /// let mut header = PacketHeader::new(3, 0);
    /// header.payload_size = 100;
    /// let decoded = PacketHeader::decode(&header.encode()).unwrap();
    /// assert_eq!(decoded.payload_size, 100);
    /// assert_eq!(decoded.routing_id, 3);
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(TesError::InsufficientData {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }

        let mut cursor = &buf[..HEADER_SIZE];
        let marker = u32::get(&mut cursor);
        if marker != PACKET_MARKER {
            return Err(TesError::MalformedHeader(format!(
                "bad marker {:#010x}",
                marker
            )));
        }

        let header = Self {
            version_major: u8::get(&mut cursor),
            version_minor: u8::get(&mut cursor),
            payload_size: u16::get(&mut cursor),
            flags: u8::get(&mut cursor),
            routing_id: u16::get(&mut cursor),
            message_id: u16::get(&mut cursor),
        };
        header.validate()?;
        Ok(header)
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Major version matches `VERSION_MAJOR`
    /// - Reserved flag bits are 0
    /// - Payload size doesn't exceed `MAX_PAYLOAD_SIZE`
    pub fn validate(&self) -> Result<()> {
        if self.version_major != VERSION_MAJOR {
            return Err(TesError::MalformedHeader(format!(
                "unsupported version {}.{}",
                self.version_major, self.version_minor
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(TesError::MalformedHeader(
                "reserved flag bits must be 0".to_string(),
            ));
        }

        if self.payload_size as usize > MAX_PAYLOAD_SIZE {
            return Err(TesError::MalformedHeader(format!(
                "payload size {} exceeds maximum {}",
                self.payload_size, MAX_PAYLOAD_SIZE
            )));
        }

        Ok(())
    }

    /// Check if the packet carries a trailing CRC.
    #[inline]
    pub fn has_crc(&self) -> bool {
        !flags::has_flag(self.flags, flags::NO_CRC)
    }

    /// Size of the trailing CRC (0 or 2).
    #[inline]
    pub fn crc_size(&self) -> usize {
        if self.has_crc() {
            CRC_SIZE
        } else {
            0
        }
    }

    /// Total encoded size: header, payload and CRC if present.
    #[inline]
    pub fn packet_size(&self) -> usize {
        HEADER_SIZE + self.payload_size as usize + self.crc_size()
    }

    /// Check if this header routes to a collated packet.
    #[inline]
    pub fn is_collated(&self) -> bool {
        self.routing_id == routing::COLLATED_PACKET
    }
}
