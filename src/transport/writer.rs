//! Dedicated writer task for streaming packets to a socket or pipe.
//!
//! Producers hand packets to a [`WriterHandle`]; a single task owns the
//! connection, drains the queue in batches and writes each batch with one
//! vectored write where the kernel allows it.
//!
//! # Architecture
//!
//! ```text
//! Producer 1 ─┐
//! Producer 2 ─┼─► mpsc::Sender<Packet> ─► Writer Task ─► [collate] ─► AsyncWrite
//! Producer N ─┘
//! ```
//!
//! With [`WriterConfig::collate`] set, every batch is bundled through a
//! [`CollatedPacketEncoder`], so bursts of small packets leave as a few
//! (optionally gzipped) collated packets.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::collate::{CollatedPacketEncoder, MAX_COLLATED_BYTES};
use crate::config::WriterConfig;
use crate::error::{Result, TesError};
use crate::protocol::Packet;

/// Maximum packets to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Handle for queueing packets on the writer task.
///
/// This is cheaply cloneable and can be shared across producers.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Packet>,
    /// Queued packets not yet written (for backpressure).
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<Packet>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Queue a packet.
    ///
    /// Waits while backpressure is active, timing out after the configured
    /// duration.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(packet).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            TesError::ConnectionClosed
        })
    }

    /// Queue a packet without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, packet: Packet) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(TesError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(packet).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => TesError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => TesError::ConnectionClosed,
            }
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                tracing::warn!(
                    pending = self.pending.load(Ordering::Acquire),
                    "backpressure timeout"
                );
                return Err(TesError::BackpressureTimeout);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Packets queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for queueing packets.
///
/// The task ends with `Ok(())` once every handle is dropped and the queue
/// is drained, or with the first I/O or encoding error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_packets,
        config.backpressure_timeout(),
    );

    let encoder = config
        .collate
        .then(|| CollatedPacketEncoder::new(config.codec));
    let task = tokio::spawn(writer_loop(rx, writer, pending, encoder));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Packet>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    mut encoder: Option<CollatedPacketEncoder>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let Some(first) = rx.recv().await else {
            tracing::debug!("writer channel closed");
            return Ok(());
        };

        batch.clear();
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(packet) => batch.push(packet),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let wire = encode_batch(&batch, encoder.as_mut())?;
        tracing::trace!(packets = batch_size, chunks = wire.len(), "writing batch");
        write_batch(&mut writer, &wire).await?;

        pending.fetch_sub(batch_size, Ordering::Release);
    }
}

/// Turn a batch into the wire images to send, one per outgoing packet.
///
/// Packets too large to fit in a collation are sent as they are, after
/// whatever was collated before them.
fn encode_batch(
    batch: &[Packet],
    encoder: Option<&mut CollatedPacketEncoder>,
) -> Result<Vec<Bytes>> {
    let Some(encoder) = encoder else {
        return Ok(batch.iter().map(encode_packet).collect());
    };

    let mut wire = Vec::new();
    for packet in batch {
        if packet.encoded_len_without_crc() > MAX_COLLATED_BYTES {
            wire.extend(encoder.finalise()?.iter().map(encode_packet));
            wire.push(encode_packet(packet));
        } else {
            encoder.add(packet)?;
        }
    }
    wire.extend(encoder.finalise()?.iter().map(encode_packet));
    Ok(wire)
}

fn encode_packet(packet: &Packet) -> Bytes {
    let mut buf = BytesMut::with_capacity(packet.encoded_len());
    packet.encode_into(&mut buf);
    buf.freeze()
}

/// Write a batch using scatter/gather I/O, continuing after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(TesError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices covering everything after the first `skip_bytes` of the batch.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut start = 0;

    for chunk in batch {
        let end = start + chunk.len();
        if skip_bytes < end && !chunk.is_empty() {
            slices.push(IoSlice::new(&chunk[skip_bytes.saturating_sub(start)..]));
        }
        start = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecConfig;
    use crate::protocol::{CRC_SIZE, HEADER_SIZE};
    use crate::stream::PacketStreamReader;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn packet(message_id: u16, payload: &'static [u8]) -> Packet {
        Packet::new(64, message_id, Bytes::from_static(payload)).unwrap()
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        handle.send(packet(1, b"hello")).await.unwrap();

        let mut buf = vec![0u8; HEADER_SIZE + 5 + CRC_SIZE];
        server.read_exact(&mut buf).await.unwrap();

        assert_eq!(buf, packet(1, b"hello").encode());
    }

    #[tokio::test]
    async fn test_writer_handle_pending_count() {
        let (client, _server) = duplex(4096);
        let config = WriterConfig {
            max_pending_packets: 1000,
            channel_capacity: 100,
            ..WriterConfig::default()
        };
        let (handle, _task) = spawn_writer_task(client, config);

        assert_eq!(handle.pending_count(), 0);
        assert!(!handle.is_backpressure_active());
    }

    #[tokio::test]
    async fn test_writer_batching_preserves_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, task) = spawn_writer_task_default(client);

        for i in 0..10u16 {
            handle.send(packet(i, b"abcd")).await.unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let mut written = Vec::new();
        server.read_to_end(&mut written).await.unwrap();
        assert_eq!(written.len(), 10 * (HEADER_SIZE + 4 + CRC_SIZE));

        let ids: Vec<u16> = PacketStreamReader::new(Cursor::new(written))
            .map(|p| p.unwrap().message_id())
            .collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_writer_collates_batches() {
        let (client, mut server) = duplex(64 * 1024);
        let config = WriterConfig {
            collate: true,
            codec: CodecConfig::compressed(),
            ..WriterConfig::default()
        };
        let (handle, task) = spawn_writer_task(client, config);

        for i in 0..20u16 {
            handle.send(packet(i, b"repetitive payload")).await.unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let mut written = Vec::new();
        server.read_to_end(&mut written).await.unwrap();
        assert!(written.len() < 20 * (HEADER_SIZE + 18 + CRC_SIZE));

        let packets: Vec<Packet> = PacketStreamReader::new(Cursor::new(written))
            .map(|p| p.unwrap())
            .collect();
        assert_eq!(packets.len(), 20);
        for (i, p) in packets.iter().enumerate() {
            assert_eq!(p.message_id(), i as u16);
            assert_eq!(p.payload(), b"repetitive payload");
        }
    }

    #[test]
    fn test_encode_batch_passes_oversized_packets_through() {
        let mut encoder = CollatedPacketEncoder::new(CodecConfig::default());
        let big = Packet::new(1, 2, vec![7u8; MAX_COLLATED_BYTES]).unwrap();
        let batch = vec![packet(1, b"a"), big.clone(), packet(2, b"b")];

        let wire = encode_batch(&batch, Some(&mut encoder)).unwrap();

        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1], Bytes::from(big.encode()));
        assert!(encoder.is_empty());
    }

    #[test]
    fn test_try_send_at_capacity() {
        let (tx, _rx) = mpsc::channel::<Packet>(10);
        let pending = Arc::new(AtomicUsize::new(100));

        let handle = WriterHandle::new(tx, pending, 100, Duration::from_secs(1));

        let result = handle.try_send(packet(42, b""));
        assert!(matches!(result, Err(TesError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_send_times_out_under_backpressure() {
        let (tx, _rx) = mpsc::channel::<Packet>(10);
        let pending = Arc::new(AtomicUsize::new(5));

        let handle = WriterHandle::new(tx, pending, 5, Duration::from_millis(5));

        let result = handle.send(packet(42, b"")).await;
        assert!(matches!(result, Err(TesError::BackpressureTimeout)));
        assert_eq!(handle.pending_count(), 5);
    }

    #[test]
    fn test_build_remaining_slices() {
        let batch = vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world")];

        assert_eq!(build_remaining_slices(&batch, 0).len(), 2);

        let slices = build_remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b"lo");

        let slices = build_remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"world");
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<Bytes> = (0..5).map(|i| encode_packet(&packet(i, b"abc"))).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), 5 * (HEADER_SIZE + 3 + CRC_SIZE));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        drop(handle);

        assert!(task.await.unwrap().is_ok());
    }
}
