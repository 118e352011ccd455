//! Protocol module - wire format, framing, and packet types.
//!
//! This module implements the binary framing layer:
//! - 13-byte header encoding/decoding
//! - CRC-16 integrity check
//! - Packet struct with typed accessors, writer and reader
//! - Resynchronising packet buffer for accumulating partial reads

pub mod crc;
mod endian;
mod packet;
mod packet_buffer;
mod wire_format;

pub use self::crc::{crc16, CRC_SIZE};
pub use endian::WireScalar;
pub use packet::{build_packet, compute_crc, Packet, PacketReader, PacketWriter};
pub use packet_buffer::{BufferStatus, PacketBuffer, PopResult};
pub use wire_format::{
    flags, routing, PacketHeader, FLAGS_OFFSET, HEADER_SIZE, MARKER_SIZE, MAX_PACKET_SIZE,
    MAX_PAYLOAD_SIZE, PACKET_MARKER, PAYLOAD_SIZE_OFFSET, VERSION_MAJOR, VERSION_MINOR,
};
