//! Codec and transport configuration.
//!
//! Every struct has a `Default` built from the `DEFAULT_*` constants and can
//! be loaded from JSON. Missing fields fall back to their defaults, so a
//! config file only needs to name what it changes:
//!
//! ```
//! use tes_wire::config::WriterConfig;
//!
//! let config = WriterConfig::from_json_str(r#"{ "collate": true, "codec": { "compress": true } }"#).unwrap();
//! assert!(config.collate);
//! assert!(config.codec.compress);
//! assert_eq!(config.channel_capacity, tes_wire::config::DEFAULT_CHANNEL_CAPACITY);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default gzip level (flate2's `Compression::default()`).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Default size of a single read from the byte source.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Default maximum pending packets before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_PACKETS: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout in milliseconds.
pub const DEFAULT_BACKPRESSURE_TIMEOUT_MS: u64 = 5_000;

fn load_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    Ok(serde_json::from_str(json)?)
}

fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    load_json(&text)
}

/// Encoding options for collated packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Gzip collated payloads when that makes them smaller.
    pub compress: bool,
    /// Gzip level, 0-9.
    pub compression_level: u32,
    /// Append a CRC to outer packets.
    pub crc: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compress: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            crc: true,
        }
    }
}

impl CodecConfig {
    /// Config with compression enabled at the default level.
    pub fn compressed() -> Self {
        Self {
            compress: true,
            ..Self::default()
        }
    }

    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        load_json(json)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        load_json_file(path.as_ref())
    }
}

/// Configuration for the reader task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Bytes requested from the source per read.
    pub read_chunk_size: usize,
    /// Capacity of the decoded packet queue.
    pub channel_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ReaderConfig {
    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        load_json(json)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        load_json_file(path.as_ref())
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Maximum pending packets before backpressure kicks in.
    pub max_pending_packets: usize,
    /// Channel capacity for the packet queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout_ms: u64,
    /// Bundle each batch of queued packets into collated packets.
    pub collate: bool,
    /// Collation encoding options.
    pub codec: CodecConfig,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_packets: DEFAULT_MAX_PENDING_PACKETS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT_MS,
            collate: false,
            codec: CodecConfig::default(),
        }
    }
}

impl WriterConfig {
    /// Backpressure timeout as a `Duration`.
    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }

    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        load_json(json)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        load_json_file(path.as_ref())
    }
}
