//! Collated packets - many inner packets under one header and CRC.
//!
//! # Example
//!
//! ```
//! use tes_wire::collate::{CollatedPacketDecoder, CollatedPacketEncoder};
//! use tes_wire::config::CodecConfig;
//! use tes_wire::protocol::Packet;
//!
//! let mut encoder = CollatedPacketEncoder::new(CodecConfig::compressed());
//! for id in 0..10u16 {
//!     let packet = Packet::new(64, id, vec![id as u8; 32]).unwrap();
//!     encoder.add(&packet).unwrap();
//! }
//!
//! let mut decoder = CollatedPacketDecoder::new();
//! let mut count = 0;
//! for outer in encoder.finalise().unwrap() {
//!     decoder.set_packet(outer).unwrap();
//!     while let Some(inner) = decoder.next().unwrap() {
//!         assert_eq!(inner.message_id(), count);
//!         count += 1;
//!     }
//! }
//! assert_eq!(count, 10);
//! ```

mod decoder;
mod encoder;
mod message;

pub use decoder::{expand, CollatedPacketDecoder, MAX_NESTING_DEPTH};
pub use encoder::{CollatedPacketEncoder, COLLATION_OVERHEAD, MAX_COLLATED_BYTES};
pub use message::{collation_flags, gunzip, gzip, CollationHeader, COLLATION_HEADER_SIZE};
