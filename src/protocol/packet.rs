//! Packet struct with typed accessors, plus the encode-side builder and the
//! decode-side payload cursor.
//!
//! A [`Packet`] is immutable once built. Payloads use `bytes::Bytes` so a
//! delivered packet can be inspected from several places without copying.
//!
//! # Example
//!
//! ```
//! use tes_wire::protocol::{PacketWriter, routing};
//!
//! let mut writer = PacketWriter::new(routing::USER_ID_START, 1);
//! writer.write(42u32).unwrap();
//! writer.write(1.5f32).unwrap();
//! let packet = writer.finalise().unwrap();
//!
//! let mut reader = packet.reader();
//! assert_eq!(reader.read::<u32>().unwrap(), 42);
//! assert_eq!(reader.read::<f32>().unwrap(), 1.5);
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::crc::{crc16, crc16_parts};
use super::endian::WireScalar;
use super::wire_format::{flags, PacketHeader, HEADER_SIZE, MARKER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::{Result, TesError};

/// A complete protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    payload: Bytes,
    crc: Option<u16>,
}

impl Packet {
    /// Build a packet with a CRC for the given routing and message IDs.
    pub fn new(routing_id: u16, message_id: u16, payload: impl Into<Bytes>) -> Result<Self> {
        Self::with_header(PacketHeader::new(routing_id, message_id), payload)
    }

    /// Build a packet from a header template and payload.
    ///
    /// The header's payload size is overwritten with the real payload length.
    /// A CRC is computed unless the header carries [`flags::NO_CRC`].
    ///
    /// # Errors
    ///
    /// - `BufferOverflow` if the payload exceeds `MAX_PAYLOAD_SIZE`.
    /// - `MalformedHeader` for a foreign major version or reserved flag bits,
    ///   which every receiver would drop.
    pub fn with_header(mut header: PacketHeader, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TesError::BufferOverflow {
                requested: payload.len(),
                available: MAX_PAYLOAD_SIZE,
            });
        }
        header.payload_size = payload.len() as u16;
        header.validate()?;
        let crc = header.has_crc().then(|| compute_crc(&header, &payload));
        Ok(Self {
            header,
            payload,
            crc,
        })
    }

    /// Decode one complete packet from the start of `frame`.
    ///
    /// Bytes after the packet are ignored. Use [`PacketBuffer`] for streams,
    /// where garbage and partial reads are expected.
    ///
    /// # Errors
    ///
    /// - `MalformedHeader` if the header is invalid.
    /// - `InsufficientData` if `frame` is shorter than the packet.
    /// - `CrcReject` if the checksum does not match.
    ///
    /// [`PacketBuffer`]: crate::protocol::PacketBuffer
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let header = PacketHeader::decode(frame)?;
        let size = header.packet_size();
        if frame.len() < size {
            return Err(TesError::InsufficientData {
                needed: size,
                available: frame.len(),
            });
        }

        let payload_end = HEADER_SIZE + header.payload_size as usize;
        let crc = if header.has_crc() {
            let expected = u16::from_be_bytes([frame[payload_end], frame[payload_end + 1]]);
            let actual = crc16(&frame[MARKER_SIZE..payload_end]);
            if actual != expected {
                return Err(TesError::CrcReject { expected, actual });
            }
            Some(expected)
        } else {
            None
        };

        let payload = Bytes::copy_from_slice(&frame[HEADER_SIZE..payload_end]);
        Ok(Self::from_wire(header, payload, crc))
    }

    /// Assemble a packet whose bytes were already validated by the reader.
    pub(crate) fn from_wire(header: PacketHeader, payload: Bytes, crc: Option<u16>) -> Self {
        Self {
            header,
            payload,
            crc,
        }
    }

    /// Get the decoded header.
    #[inline]
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Get the routing ID.
    #[inline]
    pub fn routing_id(&self) -> u16 {
        self.header.routing_id
    }

    /// Get the message ID.
    #[inline]
    pub fn message_id(&self) -> u16 {
        self.header.message_id
    }

    /// Get the CRC, if the packet carries one.
    #[inline]
    pub fn crc(&self) -> Option<u16> {
        self.crc
    }

    /// Check if this packet is a collated bundle.
    #[inline]
    pub fn is_collated(&self) -> bool {
        self.header.is_collated()
    }

    /// Encoded size in bytes, CRC included when present.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        self.header.packet_size()
    }

    /// Create a cursor over the payload.
    pub fn reader(&self) -> PacketReader {
        PacketReader::new(self.payload.clone())
    }

    /// Read a field from the payload at `offset` without a cursor.
    pub fn peek<T: WireScalar>(&self, offset: usize) -> Option<T> {
        self.payload.get(offset..).and_then(T::from_slice)
    }

    /// Encode the packet as a contiguous byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Append the encoded packet to `buf`.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        self.header.put(buf);
        buf.put_slice(&self.payload);
        if let Some(crc) = self.crc {
            crc.put(buf);
        }
    }

    /// Append the packet with [`flags::NO_CRC`] set and no trailing CRC.
    ///
    /// This is the form inner packets take inside a collated bundle.
    pub fn encode_without_crc<B: BufMut>(&self, buf: &mut B) {
        let mut header = self.header;
        header.flags |= flags::NO_CRC;
        header.put(buf);
        buf.put_slice(&self.payload);
    }

    /// Size of [`encode_without_crc`](Self::encode_without_crc) output.
    #[inline]
    pub fn encoded_len_without_crc(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Compute the CRC for a packet: header minus marker, then payload.
pub fn compute_crc(header: &PacketHeader, payload: &[u8]) -> u16 {
    let header_bytes = header.encode();
    crc16_parts(&[&header_bytes[MARKER_SIZE..], payload])
}

/// Build a complete packet as a single byte vector.
///
/// # Example
///
/// ```
/// use tes_wire::protocol::{build_packet, HEADER_SIZE, CRC_SIZE};
///
/// let bytes = build_packet(64, 1, b"hello").unwrap();
/// assert_eq!(bytes.len(), HEADER_SIZE + 5 + CRC_SIZE);
/// ```
pub fn build_packet(routing_id: u16, message_id: u16, payload: &[u8]) -> Result<Vec<u8>> {
    Ok(Packet::new(routing_id, message_id, Bytes::copy_from_slice(payload))?.encode())
}

/// Encode-side packet builder.
///
/// Accumulates payload fields in network byte order and refuses to grow
/// past its byte limit. Overflow is reported synchronously as
/// `BufferOverflow`: it is a caller bug, never silently truncated.
#[derive(Debug, Clone)]
pub struct PacketWriter {
    header: PacketHeader,
    payload: BytesMut,
    limit: usize,
}

impl PacketWriter {
    /// Create a writer limited to `MAX_PAYLOAD_SIZE`.
    pub fn new(routing_id: u16, message_id: u16) -> Self {
        Self::with_limit(routing_id, message_id, MAX_PAYLOAD_SIZE)
    }

    /// Create a writer with a smaller payload limit (clamped to `MAX_PAYLOAD_SIZE`).
    pub fn with_limit(routing_id: u16, message_id: u16, limit: usize) -> Self {
        let limit = limit.min(MAX_PAYLOAD_SIZE);
        Self {
            header: PacketHeader::new(routing_id, message_id),
            payload: BytesMut::with_capacity(limit.min(4096)),
            limit,
        }
    }

    /// Discard the payload and retarget the writer.
    pub fn reset(&mut self, routing_id: u16, message_id: u16) {
        self.header = PacketHeader::new(routing_id, message_id);
        self.payload.clear();
    }

    /// Header the packet will be finalised with.
    #[inline]
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload byte limit.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes that can still be written.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.payload.len()
    }

    fn ensure(&self, requested: usize) -> Result<()> {
        if requested > self.remaining() {
            return Err(TesError::BufferOverflow {
                requested,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Write a scalar in network byte order.
    pub fn write<T: WireScalar>(&mut self, value: T) -> Result<()> {
        self.ensure(T::SIZE)?;
        value.put(&mut self.payload);
        Ok(())
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure(bytes.len())?;
        self.payload.put_slice(bytes);
        Ok(())
    }

    /// Finish the packet with a CRC. The writer is left empty, ready for reuse
    /// with the same routing and message IDs.
    pub fn finalise(&mut self) -> Result<Packet> {
        self.header.flags &= !flags::NO_CRC;
        self.take_packet()
    }

    /// Finish the packet without a CRC ([`flags::NO_CRC`] set).
    pub fn finalise_no_crc(&mut self) -> Result<Packet> {
        self.header.flags |= flags::NO_CRC;
        self.take_packet()
    }

    fn take_packet(&mut self) -> Result<Packet> {
        let payload = self.payload.split().freeze();
        Packet::with_header(self.header, payload)
    }
}

/// Decode-side cursor over a packet payload.
#[derive(Debug, Clone)]
pub struct PacketReader {
    payload: Bytes,
}

impl PacketReader {
    /// Create a reader over `payload`.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.payload.remaining()
    }

    /// Check if the payload has been consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if needed > self.remaining() {
            return Err(TesError::InsufficientData {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Read a scalar in network byte order.
    pub fn read<T: WireScalar>(&mut self) -> Result<T> {
        self.ensure(T::SIZE)?;
        Ok(T::get(&mut self.payload))
    }

    /// Read `len` raw bytes (zero-copy).
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        Ok(self.payload.split_to(len))
    }

    /// Read a scalar at `offset` past the cursor without consuming anything.
    pub fn peek<T: WireScalar>(&self, offset: usize) -> Option<T> {
        self.payload.get(offset..).and_then(T::from_slice)
    }

    /// Skip `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure(len)?;
        self.payload.advance(len);
        Ok(())
    }
}
