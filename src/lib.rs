//! # tes-wire
//!
//! Wire protocol for streaming 3D debug scenes to a remote viewer.
//!
//! A server emits a byte stream of self-delimiting, CRC-protected packets; a
//! viewer reads them from a socket or a recorded file, recovering from
//! corruption by scanning for the next packet marker.
//!
//! ## Architecture
//!
//! - **Framing** ([`protocol`]): 13-byte header, payload, optional CRC-16 and
//!   a resynchronising [`PacketBuffer`]
//! - **Collation** ([`collate`]): many small packets bundled into one,
//!   optionally gzipped
//! - **Vertex streams** ([`vertex`]): typed arrays sent in chunks, with
//!   quantised float encodings
//! - **Drivers**: the blocking [`PacketStreamReader`] and the tokio
//!   [`transport`] tasks
//!
//! ## Example
//!
//! ```
//! use tes_wire::protocol::{PacketBuffer, PacketWriter};
//!
//! let mut writer = PacketWriter::new(64, 1);
//! writer.write(42u32).unwrap();
//! writer.write(1.5f32).unwrap();
//! let packet = writer.finalise().unwrap();
//!
//! let mut buffer = PacketBuffer::new();
//! buffer.append(&packet.encode());
//! let received = buffer.pop_packet().into_packet().unwrap();
//!
//! let mut reader = received.reader();
//! assert_eq!(reader.read::<u32>().unwrap(), 42);
//! assert_eq!(reader.read::<f32>().unwrap(), 1.5);
//! ```

pub mod collate;
pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
pub mod stream;
pub mod transport;
pub mod vertex;

pub use collate::{CollatedPacketDecoder, CollatedPacketEncoder};
pub use config::{CodecConfig, ReaderConfig, WriterConfig};
pub use error::{Result, TesError};
pub use message::Message;
pub use protocol::{Packet, PacketBuffer, PacketHeader, PacketReader, PacketWriter};
pub use stream::PacketStreamReader;
pub use vertex::{DataStreamType, VertexBuffer};
