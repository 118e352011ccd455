//! Pull-based packet reader over any `std::io::Read` source.
//!
//! Drives a [`PacketBuffer`] from a socket, file or in-memory buffer and
//! expands collated packets through a [`CollatedPacketDecoder`], so callers
//! only ever see application packets.
//!
//! ```text
//! Read ─► [gunzip from the first 1F 8B boundary] ─► PacketBuffer ─► CollatedPacketDecoder ─► next_packet()
//! ```
//!
//! Recordings are often gzipped, either as a whole or after a plain header
//! packet. While the source is still plain, every outer packet boundary is
//! checked for the gzip magic. From the first match onwards the rest of the
//! source is inflated on the fly.
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//! use tes_wire::protocol::build_packet;
//! use tes_wire::stream::PacketStreamReader;
//!
//! let mut bytes = build_packet(64, 1, b"first").unwrap();
//! bytes.extend(build_packet(64, 2, b"second").unwrap());
//!
//! let mut reader = PacketStreamReader::new(Cursor::new(bytes));
//! assert_eq!(reader.next_packet().unwrap().unwrap().payload(), b"first");
//! assert_eq!(reader.next_packet().unwrap().unwrap().payload(), b"second");
//! assert!(reader.next_packet().unwrap().is_none());
//! assert!(reader.end_of_stream());
//! ```

use std::io::{self, Read, Seek, SeekFrom};

use bytes::{Buf, BytesMut};
use flate2::read::GzDecoder;

use crate::collate::CollatedPacketDecoder;
use crate::config::DEFAULT_READ_CHUNK_SIZE;
use crate::error::Result;
use crate::protocol::{Packet, PacketBuffer, PopResult};

/// First two bytes of every gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Underlying source with room to push bytes back.
struct RawSource<R> {
    /// Bytes already taken from `inner` that must be read again.
    pending: BytesMut,
    inner: R,
    /// Bytes taken from `inner`.
    position: u64,
}

impl<R> RawSource<R> {
    fn new(inner: R) -> Self {
        Self {
            pending: BytesMut::new(),
            inner,
            position: 0,
        }
    }

    fn unread(&mut self, bytes: BytesMut) {
        let mut pending = bytes;
        pending.extend_from_slice(&self.pending);
        self.pending = pending;
    }
}

impl<R: Read> Read for RawSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.advance(n);
            return Ok(n);
        }
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

/// Byte source, before and after the switch to gzip.
enum Source<R> {
    Plain(RawSource<R>),
    Gzip(GzDecoder<RawSource<R>>),
    /// Transient while switching variants.
    Detached,
}

impl<R: Read> Source<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Plain(inner) => inner.read(buf),
            Source::Gzip(inner) => inner.read(buf),
            Source::Detached => Ok(0),
        }
    }

    fn is_plain(&self) -> bool {
        matches!(self, Source::Plain(_))
    }

    /// Inflate everything from `lookahead` onwards.
    fn inflate(&mut self, lookahead: BytesMut) {
        *self = match std::mem::replace(self, Source::Detached) {
            Source::Plain(mut raw) => {
                raw.unread(lookahead);
                Source::Gzip(GzDecoder::new(raw))
            }
            other => other,
        };
    }

    fn position(&self) -> u64 {
        match self {
            Source::Plain(raw) => raw.position,
            Source::Gzip(gz) => gz.get_ref().position,
            Source::Detached => 0,
        }
    }

    fn into_inner(self) -> Option<R> {
        match self {
            Source::Plain(raw) => Some(raw.inner),
            Source::Gzip(gz) => Some(gz.into_inner().inner),
            Source::Detached => None,
        }
    }
}

/// Reads packets from a byte stream.
pub struct PacketStreamReader<R> {
    source: Source<R>,
    buffer: PacketBuffer,
    decoder: CollatedPacketDecoder,
    chunk: Vec<u8>,
    /// Bytes of the decoded stream appended to `buffer`.
    bytes_read: u64,
    /// The buffer starts at an outer packet boundary not yet checked for gzip.
    at_boundary: bool,
    source_exhausted: bool,
    end_of_stream: bool,
}

impl<R: Read> PacketStreamReader<R> {
    /// Create a reader with the default read size.
    pub fn new(source: R) -> Self {
        Self::with_chunk_size(source, DEFAULT_READ_CHUNK_SIZE)
    }

    /// Create a reader that pulls at most `chunk_size` bytes per read.
    pub fn with_chunk_size(source: R, chunk_size: usize) -> Self {
        Self {
            source: Source::Plain(RawSource::new(source)),
            buffer: PacketBuffer::new(),
            decoder: CollatedPacketDecoder::new(),
            chunk: vec![0u8; chunk_size.max(1)],
            bytes_read: 0,
            at_boundary: true,
            source_exhausted: false,
            end_of_stream: false,
        }
    }

    /// Return the next application packet, or `None` at end of stream.
    ///
    /// Framing faults are absorbed and counted. A stalled header at the end
    /// of the source is discarded so trailing packets are still delivered.
    ///
    /// # Errors
    ///
    /// - `Io` if the source fails or a gzip section is corrupt.
    /// - `DecompressionFailure` if a collated packet cannot be expanded. That
    ///   packet is lost; the next call continues with the following one.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.decoder.next()? {
                return Ok(Some(packet));
            }

            if self.at_boundary && !self.check_boundary()? {
                continue;
            }

            match self.buffer.pop_packet() {
                PopResult::Packet(packet) => {
                    self.at_boundary = self.source.is_plain();
                    self.decoder.set_packet(packet).map_err(|e| {
                        tracing::warn!(error = %e, "dropping collated packet");
                        e
                    })?;
                }
                PopResult::CrcRejected { expected, actual } => {
                    tracing::warn!(
                        expected,
                        actual,
                        offset = self.processed_bytes(),
                        "CRC failure, resynchronising"
                    );
                }
                PopResult::Incomplete if self.source_exhausted => {
                    if !self.buffer.flush_candidate() {
                        self.end_of_stream = true;
                        return Ok(None);
                    }
                }
                PopResult::Incomplete => self.fill(self.chunk.len())?,
            }
        }
    }

    /// Look for the gzip magic at the start of the buffered bytes.
    ///
    /// Returns `false` when more bytes are needed to decide.
    fn check_boundary(&mut self) -> Result<bool> {
        let magic = u16::from_be_bytes(GZIP_MAGIC);
        match self.buffer.peek::<u16>(0) {
            Some(word) if word == magic => {
                let lookahead = self.buffer.take_unconsumed();
                self.bytes_read -= lookahead.len() as u64;
                tracing::debug!(
                    offset = self.bytes_read,
                    "gzip section detected, inflating the rest of the stream"
                );
                self.source.inflate(lookahead);
            }
            Some(_) => {}
            None if self.source_exhausted => {}
            None => {
                // At most three bytes are buffered, so no marker can be
                // completed and appending drops nothing.
                self.fill(GZIP_MAGIC.len() - self.buffer.len())?;
                return Ok(false);
            }
        }
        self.at_boundary = false;
        Ok(true)
    }

    fn fill(&mut self, want: usize) -> Result<()> {
        let want = want.clamp(1, self.chunk.len());
        let read = loop {
            match self.source.read(&mut self.chunk[..want]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if read == 0 {
            self.source_exhausted = true;
            if !self.buffer.is_empty() {
                tracing::debug!(
                    buffered = self.buffer.len(),
                    "source exhausted with partial packet buffered"
                );
            }
        } else {
            self.bytes_read += read as u64;
            self.buffer.append(&self.chunk[..read]);
        }
        Ok(())
    }

    /// Check if the source is exhausted and every packet has been returned.
    #[inline]
    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Check if a collated packet is still being expanded.
    #[inline]
    pub fn decoding_collated(&self) -> bool {
        self.decoder.is_active()
    }

    /// Stream bytes consumed by returned or discarded packets.
    ///
    /// This is a position in the decoded packet stream: plain bytes before
    /// any gzip section plus inflated bytes after it. It does not move with
    /// read-ahead, so it lines up with packet boundaries.
    #[inline]
    pub fn processed_bytes(&self) -> u64 {
        self.bytes_read - self.buffer.len() as u64
    }

    /// Raw bytes taken from the underlying source, compressed or not.
    ///
    /// Includes read-ahead that has not been turned into packets yet.
    #[inline]
    pub fn source_position(&self) -> u64 {
        self.source.position()
    }

    /// Bytes discarded while resynchronising, including unparsed bytes
    /// inside collated packets.
    #[inline]
    pub fn dropped_bytes(&self) -> u64 {
        self.buffer.dropped_byte_count() + self.decoder.dropped_byte_count()
    }

    /// Packets rejected for a bad CRC.
    #[inline]
    pub fn crc_failures(&self) -> u64 {
        self.buffer.crc_failure_count()
    }

    /// Consume the reader and return the underlying source.
    pub fn into_inner(self) -> Option<R> {
        self.source.into_inner()
    }
}

impl<R: Read + Seek> PacketStreamReader<R> {
    /// Rewind to the start of the source and forget all decode state.
    ///
    /// Packets returned after a reset replay identically from the beginning.
    pub fn reset(&mut self) -> Result<()> {
        let source = std::mem::replace(&mut self.source, Source::Detached);
        let Some(mut inner) = source.into_inner() else {
            return Err(io::Error::new(io::ErrorKind::Other, "stream source lost").into());
        };
        let rewound = inner.seek(SeekFrom::Start(0));
        self.source = Source::Plain(RawSource::new(inner));
        rewound?;

        self.buffer.clear();
        self.decoder.clear();
        self.bytes_read = 0;
        self.at_boundary = true;
        self.source_exhausted = false;
        self.end_of_stream = false;
        Ok(())
    }
}

impl<R: Read> Iterator for PacketStreamReader<R> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}
