//! Collated packet decoder.
//!
//! Expands a collated packet back into its inner packets. The inner run is
//! parsed by a [`PacketBuffer`], the same state machine that frames the outer
//! stream, so both nesting levels share identical framing rules. Collated
//! packets found inside a collation are expanded in place.
//!
//! Non-collated packets pass straight through, so a reader can hand every
//! packet it receives to [`set_packet`](CollatedPacketDecoder::set_packet).

use bytes::Bytes;

use super::message::{gunzip, CollationHeader, COLLATION_HEADER_SIZE};
use crate::error::{Result, TesError};
use crate::protocol::{Packet, PacketBuffer, PopResult};

/// Deepest collation nesting the decoder will expand.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Yields the inner packets of collated packets, in order.
#[derive(Debug, Default)]
pub struct CollatedPacketDecoder {
    /// One buffer per nesting level, innermost last.
    levels: Vec<PacketBuffer>,
    passthrough: Option<Packet>,
    dropped_bytes: u64,
}

impl CollatedPacketDecoder {
    /// Create an idle decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start decoding `packet`, discarding anything left from the last one.
    ///
    /// # Errors
    ///
    /// `DecompressionFailure` if the collation header is truncated, the body
    /// does not inflate, or its size disagrees with the header. The whole
    /// packet is dropped and the decoder is left idle.
    pub fn set_packet(&mut self, packet: Packet) -> Result<()> {
        self.clear();
        if !packet.is_collated() {
            self.passthrough = Some(packet);
            return Ok(());
        }
        self.push_level(&packet)
    }

    /// Take the next inner packet, or `None` once the packet is exhausted.
    pub fn next(&mut self) -> Result<Option<Packet>> {
        if let Some(packet) = self.passthrough.take() {
            return Ok(Some(packet));
        }

        while let Some(level) = self.levels.last_mut() {
            match level.pop_packet() {
                PopResult::Packet(packet) if packet.is_collated() => {
                    if let Err(e) = self.push_level(&packet) {
                        tracing::warn!(error = %e, "dropping nested collated packet");
                        return Err(e);
                    }
                }
                PopResult::Packet(packet) => return Ok(Some(packet)),
                PopResult::CrcRejected { expected, actual } => {
                    tracing::debug!(expected, actual, "inner packet CRC mismatch");
                }
                PopResult::Incomplete => {
                    let trailing = level.len() as u64 + level.dropped_byte_count();
                    if trailing > 0 {
                        tracing::debug!(trailing, "unparsed bytes in collated packet");
                    }
                    self.dropped_bytes += trailing;
                    self.levels.pop();
                }
            }
        }
        Ok(None)
    }

    /// Check if packets remain to be taken.
    pub fn is_active(&self) -> bool {
        self.passthrough.is_some() || !self.levels.is_empty()
    }

    /// Bytes inside collations that did not frame as packets.
    #[inline]
    pub fn dropped_byte_count(&self) -> u64 {
        self.dropped_bytes
    }

    /// Drop the current packet.
    pub fn clear(&mut self) {
        self.levels.clear();
        self.passthrough = None;
    }

    fn push_level(&mut self, packet: &Packet) -> Result<()> {
        if self.levels.len() >= MAX_NESTING_DEPTH {
            return Err(TesError::DecompressionFailure(format!(
                "collated packets nested deeper than {}",
                MAX_NESTING_DEPTH
            )));
        }

        let run = expand(packet)?;
        let mut level = PacketBuffer::with_capacity(run.len());
        level.append(&run);
        self.levels.push(level);
        Ok(())
    }
}

/// Return the inner packet run of a collated packet, inflated if needed.
pub fn expand(packet: &Packet) -> Result<Bytes> {
    let payload = packet.payload_bytes();
    let collation = CollationHeader::decode(&payload)
        .map_err(|e| TesError::DecompressionFailure(e.to_string()))?;
    let body = payload.slice(COLLATION_HEADER_SIZE..);
    let expected = collation.uncompressed_bytes as usize;

    if collation.is_compressed() {
        return gunzip(&body, expected).map(Bytes::from);
    }

    if body.len() != expected {
        return Err(TesError::DecompressionFailure(format!(
            "collated body is {} bytes, header declares {}",
            body.len(),
            expected
        )));
    }
    Ok(body)
}
