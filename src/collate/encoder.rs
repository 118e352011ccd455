//! Collated packet encoder.
//!
//! Bundles many small packets under one outer header and one CRC, optionally
//! gzip compressed. Inner packets are written without their own CRC.
//!
//! ```text
//! add(p1) ─┐
//! add(p2) ─┼─► [p1|p2|...] ─► full or finalise() ─► gzip? ─► Packet(COLLATED_PACKET)
//! add(pN) ─┘
//! ```
//!
//! An outer packet is sealed whenever the next inner packet would push the
//! uncompressed run past [`MAX_COLLATED_BYTES`], so one call to
//! [`finalise`](CollatedPacketEncoder::finalise) may return several packets.

use std::collections::VecDeque;

use bytes::BytesMut;

use super::message::{collation_flags, gzip, CollationHeader, COLLATION_HEADER_SIZE};
use crate::config::CodecConfig;
use crate::error::{Result, TesError};
use crate::message::Message;
use crate::protocol::{
    flags, routing, Packet, PacketHeader, PacketWriter, CRC_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};

/// Largest run of inner packet bytes one collated packet can carry.
pub const MAX_COLLATED_BYTES: usize = MAX_PAYLOAD_SIZE - COLLATION_HEADER_SIZE;

/// Bytes a collated packet adds around its inner packets.
pub const COLLATION_OVERHEAD: usize = HEADER_SIZE + COLLATION_HEADER_SIZE + CRC_SIZE;

/// Accumulates inner packets and emits collated outer packets.
#[derive(Debug)]
pub struct CollatedPacketEncoder {
    config: CodecConfig,
    /// Uncompressed run of inner packets for the open collation.
    pending: BytesMut,
    pending_packets: usize,
    completed: VecDeque<Packet>,
}

impl CollatedPacketEncoder {
    /// Create an encoder.
    pub fn new(config: CodecConfig) -> Self {
        Self {
            config,
            pending: BytesMut::with_capacity(MAX_COLLATED_BYTES),
            pending_packets: 0,
            completed: VecDeque::new(),
        }
    }

    /// Encoder settings.
    #[inline]
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Check if compression is enabled.
    #[inline]
    pub fn compression_enabled(&self) -> bool {
        self.config.compress
    }

    /// Queue an inner packet and return the bytes it occupies in the run.
    ///
    /// Seals the open collation first when this packet would not fit.
    ///
    /// # Errors
    ///
    /// `BufferOverflow` if the packet can never fit a collated packet.
    pub fn add(&mut self, packet: &Packet) -> Result<usize> {
        let size = packet.encoded_len_without_crc();
        if size > MAX_COLLATED_BYTES {
            return Err(TesError::BufferOverflow {
                requested: size,
                available: MAX_COLLATED_BYTES,
            });
        }

        if self.pending.len() + size > MAX_COLLATED_BYTES {
            self.seal()?;
        }

        packet.encode_without_crc(&mut self.pending);
        self.pending_packets += 1;
        Ok(size)
    }

    /// Serialise `message` as an inner packet and queue it.
    pub fn add_message<M: Message>(
        &mut self,
        routing_id: u16,
        message_id: u16,
        message: &M,
    ) -> Result<usize> {
        let mut writer = PacketWriter::with_limit(
            routing_id,
            message_id,
            MAX_COLLATED_BYTES - HEADER_SIZE,
        );
        message.write(&mut writer)?;
        let packet = writer.finalise_no_crc()?;
        self.add(&packet)
    }

    /// Seal the open collation and return every completed outer packet in
    /// the order the inner packets were added.
    ///
    /// The encoder is empty afterwards and can be reused.
    pub fn finalise(&mut self) -> Result<Vec<Packet>> {
        self.seal()?;
        Ok(self.completed.drain(..).collect())
    }

    /// Take the oldest outer packet sealed because the run filled up.
    pub fn pop_completed(&mut self) -> Option<Packet> {
        self.completed.pop_front()
    }

    /// Inner packet bytes in the open collation.
    #[inline]
    pub fn collated_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Inner packets in the open collation.
    #[inline]
    pub fn pending_packets(&self) -> usize {
        self.pending_packets
    }

    /// Check if nothing is queued or completed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.completed.is_empty()
    }

    /// Drop all queued and completed data.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.pending_packets = 0;
        self.completed.clear();
    }

    fn seal(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let run = self.pending.split().freeze();
        let inner = std::mem::take(&mut self.pending_packets);

        let mut collation = CollationHeader {
            uncompressed_bytes: run.len() as u32,
            ..CollationHeader::default()
        };

        let compressed = if self.config.compress {
            let zipped = gzip(&run, self.config.compression_level)?;
            (zipped.len() < run.len()).then_some(zipped)
        } else {
            None
        };

        let body: &[u8] = match &compressed {
            Some(zipped) => {
                collation.flags |= collation_flags::GZIP_COMPRESSED;
                zipped
            }
            None => &run,
        };

        let mut payload = BytesMut::with_capacity(COLLATION_HEADER_SIZE + body.len());
        collation.put(&mut payload);
        payload.extend_from_slice(body);

        let mut header = PacketHeader::new(routing::COLLATED_PACKET, 0);
        if !self.config.crc {
            header.flags |= flags::NO_CRC;
        }

        tracing::trace!(
            inner,
            uncompressed = run.len(),
            payload = payload.len(),
            compressed = collation.is_compressed(),
            "sealed collated packet"
        );

        self.completed
            .push_back(Packet::with_header(header, payload.freeze())?);
        Ok(())
    }
}

impl Default for CollatedPacketEncoder {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketBuffer;

    fn inner(id: u16, len: usize) -> Packet {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        Packet::new(routing::SHAPE_IDS_START, id, payload).unwrap()
    }

    #[test]
    fn test_add_returns_bytes_queued() {
        let mut encoder = CollatedPacketEncoder::default();
        let queued = encoder.add(&inner(1, 10)).unwrap();
        assert_eq!(queued, HEADER_SIZE + 10);
        assert_eq!(encoder.collated_bytes(), HEADER_SIZE + 10);
        assert_eq!(encoder.pending_packets(), 1);
    }

    #[test]
    fn test_finalise_empty_is_no_packets() {
        let mut encoder = CollatedPacketEncoder::default();
        assert!(encoder.finalise().unwrap().is_empty());
    }

    #[test]
    fn test_uncompressed_layout() {
        let mut encoder = CollatedPacketEncoder::default();
        let first = inner(1, 4);
        encoder.add(&first).unwrap();
        let packets = encoder.finalise().unwrap();

        assert_eq!(packets.len(), 1);
        let outer = &packets[0];
        assert!(outer.is_collated());
        assert!(outer.crc().is_some());

        let collation = CollationHeader::decode(outer.payload()).unwrap();
        assert!(!collation.is_compressed());
        assert_eq!(collation.uncompressed_bytes as usize, HEADER_SIZE + 4);

        // Inner packet is framed with NO_CRC and no trailing checksum.
        let body = &outer.payload()[COLLATION_HEADER_SIZE..];
        let inner_header = PacketHeader::decode(body).unwrap();
        assert!(!inner_header.has_crc());
        assert_eq!(body.len(), HEADER_SIZE + 4);
        assert_eq!(&body[HEADER_SIZE..], first.payload());
        assert!(encoder.is_empty());
    }

    #[test]
    fn test_compression_applied_when_smaller() {
        let mut encoder = CollatedPacketEncoder::new(CodecConfig::compressed());
        for id in 0..20 {
            encoder.add(&inner(id, 200)).unwrap();
        }
        let packets = encoder.finalise().unwrap();
        assert_eq!(packets.len(), 1);

        let collation = CollationHeader::decode(packets[0].payload()).unwrap();
        assert!(collation.is_compressed());
        assert_eq!(collation.uncompressed_bytes as usize, 20 * (HEADER_SIZE + 200));
        assert!(packets[0].payload_len() < collation.uncompressed_bytes as usize);
    }

    #[test]
    fn test_incompressible_falls_back_to_raw() {
        let mut encoder = CollatedPacketEncoder::new(CodecConfig::compressed());
        // A lone tiny packet grows under gzip's fixed overhead.
        encoder.add(&inner(1, 1)).unwrap();
        let packets = encoder.finalise().unwrap();
        let collation = CollationHeader::decode(packets[0].payload()).unwrap();
        assert!(!collation.is_compressed());
    }

    #[test]
    fn test_no_crc_outer_packet() {
        let config = CodecConfig {
            crc: false,
            ..CodecConfig::default()
        };
        let mut encoder = CollatedPacketEncoder::new(config);
        encoder.add(&inner(1, 8)).unwrap();
        let packets = encoder.finalise().unwrap();
        assert!(packets[0].crc().is_none());
    }

    #[test]
    fn test_overflow_seals_and_starts_new_packet() {
        let mut encoder = CollatedPacketEncoder::default();
        let big = inner(1, 30_000);
        encoder.add(&big).unwrap();
        encoder.add(&big).unwrap();
        assert!(encoder.pop_completed().is_none());

        // Third one does not fit the first collation.
        encoder.add(&big).unwrap();
        let sealed = encoder.pop_completed().unwrap();
        assert!(sealed.payload_len() <= MAX_PAYLOAD_SIZE);
        assert_eq!(encoder.pending_packets(), 1);

        let rest = encoder.finalise().unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_every_outer_packet_fits() {
        let mut encoder = CollatedPacketEncoder::default();
        for id in 0..200 {
            encoder.add(&inner(id, 1000)).unwrap();
        }
        let packets = encoder.finalise().unwrap();
        assert!(packets.len() > 1);
        for packet in &packets {
            assert!(packet.payload_len() <= MAX_PAYLOAD_SIZE);
        }
    }

    #[test]
    fn test_inner_packet_too_large() {
        let mut encoder = CollatedPacketEncoder::default();
        let huge = inner(1, MAX_COLLATED_BYTES);
        assert!(matches!(
            encoder.add(&huge),
            Err(TesError::BufferOverflow { .. })
        ));
        assert!(encoder.is_empty());
    }

    #[test]
    fn test_outer_packet_passes_packet_buffer() {
        let mut encoder = CollatedPacketEncoder::new(CodecConfig::compressed());
        for id in 0..5 {
            encoder.add(&inner(id, 64)).unwrap();
        }
        let outer = encoder.finalise().unwrap().remove(0);

        let mut buffer = PacketBuffer::new();
        buffer.append(&outer.encode());
        assert_eq!(buffer.pop_packet().into_packet(), Some(outer));
    }

    #[test]
    fn test_add_message() {
        struct Marker(u32);
        impl Message for Marker {
            fn write(&self, writer: &mut PacketWriter) -> Result<()> {
                writer.write(self.0)
            }
            fn read(reader: &mut crate::protocol::PacketReader) -> Result<Self> {
                Ok(Marker(reader.read()?))
            }
        }

        let mut encoder = CollatedPacketEncoder::default();
        let queued = encoder
            .add_message(routing::CONTROL, 3, &Marker(99))
            .unwrap();
        assert_eq!(queued, HEADER_SIZE + 4);
    }
}
