//! Typed vertex streams.
//!
//! - [`DataStreamType`] - wire tags and sizes
//! - [`VertexElement`] - the ten storage types and conversions between them
//! - [`VertexBuffer`] - cross-type accessors and the chunked codec

mod buffer;
mod data_type;
pub mod element;

pub use buffer::{
    estimate_transfer_count, ChunkContext, VertexBuffer, CHUNK_HEADER_SIZE, MAX_CHUNK_ELEMENTS,
};
pub use data_type::DataStreamType;
pub use element::{VertexData, VertexElement};
