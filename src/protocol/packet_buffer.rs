//! Resynchronising packet buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. Bytes may arrive
//! in slices of any size, including one byte at a time. The buffer moves
//! through these states:
//!
//! ```text
//!              marker + valid header
//!  Collecting ───────────────────────► HeaderValid ──► AwaitingPayload ──► Complete
//!      ▲  │                                                    │              │
//!      │  └─ garbage / malformed header: drop, rescan          │   bad CRC    │ pop
//!      │                                                       ▼              │
//!      └──────────────────────────── CrcReject ◄──────────────────────────────┘
//! ```
//!
//! Framing faults never surface as errors. Bytes discarded while hunting for
//! a marker are counted in [`PacketBuffer::dropped_byte_count`] and checksum
//! failures are reported by [`PacketBuffer::pop_packet`].
//!
//! # Example
//!
//! ```
//! use tes_wire::protocol::{build_packet, PacketBuffer, PopResult};
//!
//! let bytes = build_packet(64, 1, b"hello").unwrap();
//! let mut buffer = PacketBuffer::new();
//!
//! buffer.append(b"noise");
//! for chunk in bytes.chunks(3) {
//!     buffer.append(chunk);
//! }
//!
//! match buffer.pop_packet() {
//!     PopResult::Packet(packet) => assert_eq!(packet.payload(), b"hello"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! assert_eq!(buffer.dropped_byte_count(), 5);
//! ```

use bytes::BytesMut;

use super::crc::{crc16, CRC_SIZE};
use super::endian::WireScalar;
use super::packet::Packet;
use super::wire_format::{PacketHeader, HEADER_SIZE, MARKER_SIZE, PACKET_MARKER};

/// Marker as it appears on the wire.
const MARKER_BYTES: [u8; MARKER_SIZE] = PACKET_MARKER.to_be_bytes();

/// Observable state of a [`PacketBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// Hunting for a marker or waiting for a full header.
    Collecting,
    /// A valid header is buffered, no payload bytes yet.
    HeaderValid,
    /// A valid header is buffered and part of the payload has arrived.
    AwaitingPayload,
    /// A whole candidate packet is buffered and ready to pop.
    Complete,
    /// The last candidate failed its checksum and was discarded.
    CrcReject,
}

/// Outcome of [`PacketBuffer::pop_packet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopResult {
    /// A complete packet whose checksum (if any) matched.
    Packet(Packet),
    /// A complete candidate failed its checksum. Its marker was dropped and
    /// scanning resumed just past it.
    CrcRejected {
        /// CRC carried by the candidate.
        expected: u16,
        /// CRC computed over the received bytes.
        actual: u16,
    },
    /// Not enough bytes buffered for a whole packet.
    Incomplete,
}

impl PopResult {
    /// `false` only for [`PopResult::CrcRejected`].
    pub fn crc_ok(&self) -> bool {
        !matches!(self, PopResult::CrcRejected { .. })
    }

    /// Take the packet, if any.
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            PopResult::Packet(packet) => Some(packet),
            _ => None,
        }
    }
}

/// State machine for packet parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Scanning for a marker or waiting for `HEADER_SIZE` bytes after one.
    Collecting,
    /// Buffer starts with a validated header.
    Candidate(PacketHeader),
}

/// Buffer for accumulating incoming bytes and extracting complete packets.
#[derive(Debug)]
pub struct PacketBuffer {
    /// Unconsumed bytes. Once synchronised, index 0 is a marker.
    buffer: BytesMut,
    state: State,
    /// Set when a candidate fails its CRC, cleared on the next sync.
    rejected: bool,
    dropped_bytes: u64,
    crc_failures: u64,
}

impl PacketBuffer {
    /// Create an empty buffer with 64KB initial capacity.
    pub fn new() -> Self {
        Self::with_capacity(64 * 1024)
    }

    /// Create an empty buffer with a custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::Collecting,
            rejected: false,
            dropped_bytes: 0,
            crc_failures: 0,
        }
    }

    /// Feed newly arrived bytes.
    ///
    /// Bytes preceding the next marker are discarded immediately and counted.
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        self.sync();
    }

    /// Try to take the next complete packet.
    ///
    /// On a checksum failure only the candidate's marker is discarded, so a
    /// genuine packet hiding inside the corrupted length is still found.
    pub fn pop_packet(&mut self) -> PopResult {
        self.sync();

        let header = match self.state {
            State::Candidate(header) => header,
            State::Collecting => return PopResult::Incomplete,
        };

        let size = header.packet_size();
        if self.buffer.len() < size {
            return PopResult::Incomplete;
        }

        let crc = if header.has_crc() {
            let crc_at = size - CRC_SIZE;
            let actual = crc16(&self.buffer[MARKER_SIZE..crc_at]);
            let expected = u16::from_slice(&self.buffer[crc_at..size]).unwrap_or_default();
            if actual != expected {
                self.crc_failures += 1;
                tracing::debug!(
                    routing_id = header.routing_id,
                    expected,
                    actual,
                    "packet CRC mismatch, resynchronising"
                );
                self.discard(MARKER_SIZE);
                self.rejected = true;
                self.sync();
                return PopResult::CrcRejected { expected, actual };
            }
            Some(expected)
        } else {
            None
        };

        let frame = self.buffer.split_to(size).freeze();
        let payload = frame.slice(HEADER_SIZE..HEADER_SIZE + header.payload_size as usize);
        // The next call syncs. Until then the bytes after this packet stay
        // untouched for `take_unconsumed`.
        self.state = State::Collecting;

        PopResult::Packet(Packet::from_wire(header, payload, crc))
    }

    /// Read a field at `offset` from the start of the unconsumed bytes.
    ///
    /// Once a marker has been found, offset 0 is the marker of the pending
    /// candidate, so `peek::<u32>(HEADER_SIZE)` reads the first payload word.
    pub fn peek<T: WireScalar>(&self, offset: usize) -> Option<T> {
        self.buffer.get(offset..).and_then(T::from_slice)
    }

    /// Remove and return every buffered byte without counting it as dropped.
    ///
    /// Right after a packet is popped this is exactly the stream that
    /// follows it.
    pub fn take_unconsumed(&mut self) -> BytesMut {
        self.state = State::Collecting;
        self.rejected = false;
        self.buffer.split()
    }

    /// Discard one byte of a candidate that can never complete.
    ///
    /// Used at end of stream when a header promised more payload than the
    /// source delivered. Returns `false` once the buffer is empty.
    pub fn flush_candidate(&mut self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        self.discard(1);
        self.sync();
        true
    }

    /// Current state, as of the last `append` or `pop_packet`.
    ///
    /// Right after a packet is popped this is `Collecting` until the next
    /// call rescans the remaining bytes.
    pub fn status(&self) -> BufferStatus {
        match self.state {
            State::Collecting if self.rejected => BufferStatus::CrcReject,
            State::Collecting => BufferStatus::Collecting,
            State::Candidate(header) => {
                let have = self.buffer.len();
                if have >= header.packet_size() {
                    BufferStatus::Complete
                } else if have > HEADER_SIZE {
                    BufferStatus::AwaitingPayload
                } else {
                    BufferStatus::HeaderValid
                }
            }
        }
    }

    /// Bytes discarded while resynchronising, since creation or `clear`.
    #[inline]
    pub fn dropped_byte_count(&self) -> u64 {
        self.dropped_bytes
    }

    /// Candidates rejected for a bad checksum.
    #[inline]
    pub fn crc_failure_count(&self) -> u64 {
        self.crc_failures
    }

    /// Get the number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer, counters and state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::Collecting;
        self.rejected = false;
        self.dropped_bytes = 0;
        self.crc_failures = 0;
    }

    fn discard(&mut self, count: usize) {
        let count = count.min(self.buffer.len());
        let _ = self.buffer.split_to(count);
        self.dropped_bytes += count as u64;
        self.state = State::Collecting;
    }

    /// Advance from `Collecting` to `Candidate` as far as the buffered bytes
    /// allow.
    fn sync(&mut self) {
        while let State::Collecting = self.state {
            match find_marker(&self.buffer) {
                Some(0) => {}
                Some(at) => {
                    tracing::debug!(dropped = at, "skipping bytes before packet marker");
                    self.discard(at);
                }
                None => {
                    // Keep a tail that may be the start of a split marker.
                    let keep = self.buffer.len().min(MARKER_SIZE - 1);
                    let drop = self.buffer.len() - keep;
                    if drop > 0 {
                        tracing::debug!(dropped = drop, "no packet marker in buffered bytes");
                        self.discard(drop);
                    }
                    return;
                }
            }

            if self.buffer.len() < HEADER_SIZE {
                return;
            }

            match PacketHeader::decode(&self.buffer[..HEADER_SIZE]) {
                Ok(header) => {
                    self.state = State::Candidate(header);
                    self.rejected = false;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "malformed header, resynchronising");
                    self.discard(1);
                }
            }
        }
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(MARKER_SIZE)
        .position(|window| window == MARKER_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::build_packet;
    use crate::protocol::wire_format::{flags, routing, MAX_PAYLOAD_SIZE, VERSION_MAJOR};

    fn pop_all(buffer: &mut PacketBuffer) -> (Vec<Packet>, usize) {
        let mut packets = Vec::new();
        let mut rejects = 0;
        loop {
            match buffer.pop_packet() {
                PopResult::Packet(packet) => packets.push(packet),
                PopResult::CrcRejected { .. } => rejects += 1,
                PopResult::Incomplete => return (packets, rejects),
            }
        }
    }

    #[test]
    fn test_single_complete_packet() {
        let mut buffer = PacketBuffer::new();
        buffer.append(&build_packet(routing::MESH, 1, b"hello").unwrap());

        assert_eq!(buffer.status(), BufferStatus::Complete);
        let packet = buffer.pop_packet().into_packet().unwrap();
        assert_eq!(packet.routing_id(), routing::MESH);
        assert_eq!(packet.message_id(), 1);
        assert_eq!(packet.payload(), b"hello");
        assert!(buffer.is_empty());
        assert_eq!(buffer.status(), BufferStatus::Collecting);
        assert_eq!(buffer.dropped_byte_count(), 0);
    }

    #[test]
    fn test_multiple_packets_in_one_append() {
        let mut buffer = PacketBuffer::new();
        let mut combined = Vec::new();
        for (id, payload) in [(1u16, &b"first"[..]), (2, b"second"), (3, b"")] {
            combined.extend(build_packet(routing::USER_ID_START, id, payload).unwrap());
        }

        buffer.append(&combined);
        let (packets, rejects) = pop_all(&mut buffer);

        assert_eq!(rejects, 0);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].payload(), b"first");
        assert_eq!(packets[1].payload(), b"second");
        assert_eq!(packets[2].payload_len(), 0);
    }

    #[test]
    fn test_state_progression() {
        let mut buffer = PacketBuffer::new();
        let bytes = build_packet(1, 0, b"payload").unwrap();

        buffer.append(&bytes[..5]);
        assert_eq!(buffer.status(), BufferStatus::Collecting);

        buffer.append(&bytes[5..HEADER_SIZE]);
        assert_eq!(buffer.status(), BufferStatus::HeaderValid);
        assert!(matches!(buffer.pop_packet(), PopResult::Incomplete));

        buffer.append(&bytes[HEADER_SIZE..HEADER_SIZE + 3]);
        assert_eq!(buffer.status(), BufferStatus::AwaitingPayload);

        buffer.append(&bytes[HEADER_SIZE + 3..]);
        assert_eq!(buffer.status(), BufferStatus::Complete);
        assert!(buffer.pop_packet().into_packet().is_some());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = PacketBuffer::new();
        let bytes = build_packet(7, 9, b"hi there").unwrap();

        let mut packets = Vec::new();
        for byte in &bytes {
            buffer.append(&[*byte]);
            if let PopResult::Packet(packet) = buffer.pop_packet() {
                packets.push(packet);
            }
        }

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload(), b"hi there");
    }

    #[test]
    fn test_leading_garbage_is_counted() {
        let mut buffer = PacketBuffer::new();
        buffer.append(&[0xAA; 37]);
        // All but a possible marker prefix is dropped straight away.
        assert_eq!(buffer.dropped_byte_count(), 37 - (MARKER_SIZE as u64 - 1));

        buffer.append(&build_packet(1, 0, b"x").unwrap());
        let packet = buffer.pop_packet().into_packet().unwrap();
        assert_eq!(packet.payload(), b"x");
        assert_eq!(buffer.dropped_byte_count(), 37);
    }

    #[test]
    fn test_marker_split_across_appends() {
        let mut buffer = PacketBuffer::new();
        let bytes = build_packet(1, 0, b"split").unwrap();
        let mut first = vec![0x00, 0x11, 0x22];
        first.extend_from_slice(&bytes[..2]);

        buffer.append(&first);
        buffer.append(&bytes[2..]);

        assert_eq!(buffer.pop_packet().into_packet().unwrap().payload(), b"split");
        assert_eq!(buffer.dropped_byte_count(), 3);
    }

    #[test]
    fn test_malformed_header_drops_one_byte_and_rescans() {
        let mut bad = PacketHeader::new(1, 0).encode().to_vec();
        bad[4] = VERSION_MAJOR + 1;
        let good = build_packet(2, 0, b"good").unwrap();

        let mut buffer = PacketBuffer::new();
        buffer.append(&bad);
        buffer.append(&good);

        let (packets, rejects) = pop_all(&mut buffer);
        assert_eq!(rejects, 0);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].routing_id(), 2);
        assert_eq!(buffer.dropped_byte_count(), HEADER_SIZE as u64);
    }

    #[test]
    fn test_reserved_flags_are_malformed() {
        let mut bytes = build_packet(1, 0, b"abc").unwrap();
        bytes[crate::protocol::FLAGS_OFFSET] = 0x80;

        let mut buffer = PacketBuffer::new();
        buffer.append(&bytes);
        assert!(matches!(buffer.pop_packet(), PopResult::Incomplete));
        assert!(buffer.dropped_byte_count() > 0);
    }

    #[test]
    fn test_crc_reject_keeps_trailing_packet() {
        let mut corrupt = build_packet(1, 0, b"corrupt me").unwrap();
        corrupt[HEADER_SIZE + 2] ^= 0x10;
        let good = build_packet(2, 0, b"intact").unwrap();

        let mut buffer = PacketBuffer::new();
        buffer.append(&corrupt);
        buffer.append(&good);

        let first = buffer.pop_packet();
        assert!(!first.crc_ok());
        assert_eq!(buffer.crc_failure_count(), 1);

        let second = buffer.pop_packet().into_packet().unwrap();
        assert_eq!(second.payload(), b"intact");
        assert_eq!(buffer.dropped_byte_count(), corrupt.len() as u64);
    }

    #[test]
    fn test_crc_reject_status() {
        let mut corrupt = build_packet(1, 0, b"data").unwrap();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        let mut buffer = PacketBuffer::new();
        buffer.append(&corrupt);
        assert!(matches!(buffer.pop_packet(), PopResult::CrcRejected { .. }));
        assert_eq!(buffer.status(), BufferStatus::CrcReject);

        buffer.append(&build_packet(1, 0, b"next").unwrap());
        assert_eq!(buffer.status(), BufferStatus::Complete);
    }

    #[test]
    fn test_no_crc_packet_is_accepted() {
        let mut header = PacketHeader::new(4, 4);
        header.flags = flags::NO_CRC;
        let packet = Packet::with_header(header, &b"raw"[..]).unwrap();

        let mut buffer = PacketBuffer::new();
        buffer.append(&packet.encode());
        let popped = buffer.pop_packet().into_packet().unwrap();
        assert_eq!(popped, packet);
        assert!(popped.crc().is_none());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut buffer = PacketBuffer::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x1234_5678u32.to_be_bytes());
        buffer.append(&build_packet(routing::SHAPE_IDS_START, 0, &payload).unwrap());

        assert_eq!(buffer.peek::<u32>(0), Some(PACKET_MARKER));
        assert_eq!(buffer.peek::<u32>(HEADER_SIZE), Some(0x1234_5678));
        assert_eq!(buffer.peek::<u32>(buffer.len()), None);

        let packet = buffer.pop_packet().into_packet().unwrap();
        assert_eq!(packet.peek::<u32>(0), Some(0x1234_5678));
    }

    #[test]
    fn test_flush_stalled_candidate() {
        // Header promising a payload that never arrives, then a real packet.
        let mut stalled = PacketHeader::new(1, 0);
        stalled.payload_size = MAX_PAYLOAD_SIZE as u16;
        let good = build_packet(2, 0, b"tail").unwrap();

        let mut buffer = PacketBuffer::new();
        buffer.append(&stalled.encode());
        buffer.append(&good);
        assert!(matches!(buffer.pop_packet(), PopResult::Incomplete));

        let mut recovered = None;
        while buffer.flush_candidate() {
            if let PopResult::Packet(packet) = buffer.pop_packet() {
                recovered = Some(packet);
                break;
            }
        }
        assert_eq!(recovered.unwrap().payload(), b"tail");
        assert!(!buffer.flush_candidate());
    }

    #[test]
    fn test_bytes_after_packet_survive_until_next_pop() {
        let mut bytes = build_packet(1, 0, b"head").unwrap();
        bytes.extend_from_slice(&[0x1F, 0x8B, 0x08, 0x00, 0x55]);

        let mut buffer = PacketBuffer::new();
        buffer.append(&bytes);
        assert_eq!(buffer.pop_packet().into_packet().unwrap().payload(), b"head");
        assert_eq!(buffer.peek::<u16>(0), Some(0x1F8B));

        let rest = buffer.take_unconsumed();
        assert_eq!(&rest[..], &[0x1F, 0x8B, 0x08, 0x00, 0x55]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.dropped_byte_count(), 0);
    }

    #[test]
    fn test_trailing_garbage_dropped_on_next_pop() {
        let mut bytes = build_packet(1, 0, b"x").unwrap();
        bytes.extend_from_slice(&[0xEE; 9]);

        let mut buffer = PacketBuffer::new();
        buffer.append(&bytes);
        assert!(buffer.pop_packet().into_packet().is_some());
        assert!(matches!(buffer.pop_packet(), PopResult::Incomplete));
        assert_eq!(buffer.dropped_byte_count(), 9 - (MARKER_SIZE as u64 - 1));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = PacketBuffer::new();
        buffer.append(&[0xFF; 10]);
        buffer.append(&PacketHeader::new(1, 0).encode());
        assert!(buffer.dropped_byte_count() > 0);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.dropped_byte_count(), 0);
        assert_eq!(buffer.status(), BufferStatus::Collecting);
    }
}
