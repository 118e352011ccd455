//! Error types for tes-wire.

use thiserror::Error;

/// Main error type for all codec and transport operations.
///
/// Framing faults (`MalformedHeader`, `CrcReject`) are normally absorbed by
/// [`PacketBuffer`](crate::protocol::PacketBuffer). They surface from
/// [`PacketHeader::decode`](crate::protocol::PacketHeader::decode) and
/// [`Packet::decode`](crate::protocol::Packet::decode), which check a single
/// header or frame.
#[derive(Debug, Error)]
pub enum TesError {
    /// I/O error on the underlying socket, pipe or file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad marker, unsupported version, reserved flags or oversized length.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// Packet checksum did not match the received bytes.
    #[error("CRC mismatch: expected {expected:#06x}, computed {actual:#06x}")]
    CrcReject {
        /// CRC carried by the packet.
        expected: u16,
        /// CRC computed over the received bytes.
        actual: u16,
    },

    /// Compressed collation payload could not be inflated or had the wrong size.
    #[error("Decompression failure: {0}")]
    DecompressionFailure(String),

    /// Attempt to encode more bytes than a packet can carry.
    #[error("Buffer overflow: {requested} bytes requested, {available} available")]
    BufferOverflow {
        /// Bytes the caller tried to write.
        requested: usize,
        /// Bytes still available in the packet.
        available: usize,
    },

    /// Payload ended before a field could be read.
    #[error("Insufficient data: {needed} bytes needed, {available} available")]
    InsufficientData {
        /// Bytes required by the read.
        needed: usize,
        /// Bytes left in the payload.
        available: usize,
    },

    /// Caller supplied an argument the codec cannot honour.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A value cannot be represented by the chosen packed type and unit.
    #[error("Value {value} out of range for quantisation unit {unit}")]
    QuantizationRange {
        /// Offending value.
        value: f64,
        /// Quantisation unit in use.
        unit: f64,
    },

    /// Transport task has gone away.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - outbound queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using TesError.
pub type Result<T> = std::result::Result<T, TesError>;
