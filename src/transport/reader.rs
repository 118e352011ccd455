//! Reader task that turns an async byte stream into application packets.
//!
//! ```text
//! AsyncRead ─► PacketBuffer ─► CollatedPacketDecoder ─► mpsc::Receiver<Packet>
//! ```
//!
//! Framing faults never end the task. Garbage is skipped, CRC failures and
//! undecodable collated packets are logged and counted, and reading resumes
//! at the next packet boundary.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::collate::CollatedPacketDecoder;
use crate::config::ReaderConfig;
use crate::error::Result;
use crate::protocol::{Packet, PacketBuffer, PopResult};

/// Counters reported when the reader task ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Bytes read from the connection.
    pub bytes_read: u64,
    /// Application packets delivered.
    pub packets: u64,
    /// Bytes skipped while resynchronising, including bytes inside collated
    /// packets that did not frame.
    pub dropped_bytes: u64,
    /// Packets rejected for a bad CRC.
    pub crc_failures: u64,
    /// Collated packets that could not be expanded.
    pub decompression_failures: u64,
}

/// Spawn a task reading packets from `reader`.
///
/// The task ends when the connection closes or the receiver is dropped and
/// returns its counters. I/O errors end it with `Err`.
pub fn spawn_reader_task<R>(
    reader: R,
    config: ReaderConfig,
) -> (mpsc::Receiver<Packet>, JoinHandle<Result<ReadStats>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(read_loop(reader, tx, config.read_chunk_size.max(1)));
    (rx, task)
}

async fn read_loop<R>(
    mut reader: R,
    tx: mpsc::Sender<Packet>,
    chunk_size: usize,
) -> Result<ReadStats>
where
    R: AsyncRead + Unpin,
{
    let mut pump = Pump::default();
    let mut buf = vec![0u8; chunk_size];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            tracing::debug!(buffered = pump.buffer.len(), "connection closed");
            pump.closed = true;
        } else {
            pump.stats.bytes_read += n as u64;
            pump.buffer.append(&buf[..n]);
        }

        while let Some(packet) = pump.next_packet() {
            if tx.send(packet).await.is_err() {
                tracing::debug!("packet receiver dropped");
                return Ok(pump.finish());
            }
            pump.stats.packets += 1;
        }

        if pump.closed {
            return Ok(pump.finish());
        }
    }
}

/// Decode state shared by one reader task.
#[derive(Default)]
struct Pump {
    buffer: PacketBuffer,
    decoder: CollatedPacketDecoder,
    stats: ReadStats,
    closed: bool,
}

impl Pump {
    /// Next application packet from the bytes buffered so far.
    fn next_packet(&mut self) -> Option<Packet> {
        loop {
            match self.decoder.next() {
                Ok(Some(packet)) => return Some(packet),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "dropping nested collated packet");
                    self.stats.decompression_failures += 1;
                    continue;
                }
            }

            match self.buffer.pop_packet() {
                PopResult::Packet(packet) => {
                    if let Err(e) = self.decoder.set_packet(packet) {
                        tracing::warn!(error = %e, "dropping collated packet");
                        self.stats.decompression_failures += 1;
                    }
                }
                PopResult::CrcRejected { expected, actual } => {
                    tracing::warn!(expected, actual, "CRC failure, resynchronising");
                }
                PopResult::Incomplete if self.closed => {
                    if !self.buffer.flush_candidate() {
                        return None;
                    }
                }
                PopResult::Incomplete => return None,
            }
        }
    }

    fn finish(&self) -> ReadStats {
        ReadStats {
            dropped_bytes: self.buffer.dropped_byte_count() + self.decoder.dropped_byte_count(),
            crc_failures: self.buffer.crc_failure_count(),
            ..self.stats
        }
    }
}
