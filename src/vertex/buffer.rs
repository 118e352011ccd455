//! Vertex buffer and its chunked stream codec.
//!
//! A vertex buffer is a flat run of numbers of one storage type, grouped
//! into elements of `component_count` values spaced `element_stride` values
//! apart. Large buffers are streamed as a series of chunks, each sized to
//! fit the caller's byte budget:
//!
//! ```text
//! ┌──────────────┬─────────────┬──────────────────────────────────────────┐
//! │ Offset       │ Count       │ count × component_count values           │
//! │ uint32 BE    │ uint16 BE   │ send type, or i16/i32 when quantised      │
//! └──────────────┴─────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Offset and count are in elements. The chunk carries no type tag or
//! quantisation unit: the message schema tells both ends which
//! [`ChunkContext`] to use.
//!
//! # Example
//!
//! ```
//! use tes_wire::protocol::PacketWriter;
//! use tes_wire::vertex::{ChunkContext, DataStreamType, VertexBuffer};
//!
//! let positions: Vec<f32> = (0..3000).map(|i| i as f32 * 0.25).collect();
//! let source = VertexBuffer::wrap(&positions[..], 3).unwrap();
//!
//! let mut received = VertexBuffer::new(DataStreamType::Float32, 3).unwrap();
//! let context = ChunkContext::exact(DataStreamType::Float32);
//! let mut offset = 0;
//! while offset < source.count() {
//!     let mut writer = PacketWriter::new(4, 1);
//!     offset += source.write(&mut writer, offset, DataStreamType::Float32, 1024).unwrap();
//!     let packet = writer.finalise().unwrap();
//!     received.read(&mut packet.reader(), &context).unwrap();
//! }
//! assert_eq!(received.as_slice::<f32>(), Some(&positions[..]));
//! ```

use std::borrow::Cow;

use super::data_type::DataStreamType;
use super::element::{with_values, VertexData, VertexElement};
use crate::error::{Result, TesError};
use crate::protocol::{PacketReader, PacketWriter, CRC_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Chunk prefix: element offset (u32) and element count (u16).
pub const CHUNK_HEADER_SIZE: usize = 6;

/// Most elements a single chunk can carry.
pub const MAX_CHUNK_ELEMENTS: usize = u16::MAX as usize;

/// Estimate how many elements of `element_size` bytes fit in one packet.
///
/// `byte_limit` is the whole packet size (0 means `MAX_PAYLOAD_SIZE`); the
/// packet header, CRC and `overhead` are subtracted. The result is capped at
/// [`MAX_CHUNK_ELEMENTS`].
pub fn estimate_transfer_count(element_size: usize, byte_limit: usize, overhead: usize) -> usize {
    if element_size == 0 {
        return 0;
    }
    let byte_limit = if byte_limit > 0 {
        byte_limit
    } else {
        MAX_PAYLOAD_SIZE
    };
    let usable = byte_limit.saturating_sub(HEADER_SIZE + overhead + CRC_SIZE);
    (usable / element_size).min(MAX_CHUNK_ELEMENTS)
}

/// How a chunk was encoded, agreed out of band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkContext {
    /// Wire type of each value.
    pub send_type: DataStreamType,
    /// Quantisation unit for packed types, ignored otherwise.
    pub quantization_unit: f64,
}

impl ChunkContext {
    /// Context for chunks written with [`VertexBuffer::write`].
    pub fn exact(send_type: DataStreamType) -> Self {
        Self {
            send_type,
            quantization_unit: 0.0,
        }
    }

    /// Context for chunks written with [`VertexBuffer::write_packed`].
    pub fn packed(send_type: DataStreamType, quantization_unit: f64) -> Self {
        Self {
            send_type,
            quantization_unit,
        }
    }
}

/// Typed numeric array streamed in bounded chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexBuffer<'a> {
    data: VertexData<'a>,
    component_count: usize,
    element_stride: usize,
}

impl<'a> VertexBuffer<'a> {
    /// Wrap values as tightly packed elements of `component_count` values.
    ///
    /// Accepts a borrowed slice (zero-copy) or an owned `Vec`.
    pub fn wrap<T: VertexElement>(
        values: impl Into<Cow<'a, [T]>>,
        component_count: usize,
    ) -> Result<Self> {
        Self::wrap_strided(values, component_count, component_count)
    }

    /// Wrap values where consecutive elements start `element_stride` values
    /// apart.
    pub fn wrap_strided<T: VertexElement>(
        values: impl Into<Cow<'a, [T]>>,
        component_count: usize,
        element_stride: usize,
    ) -> Result<Self> {
        validate_layout(component_count, element_stride)?;
        Ok(Self {
            data: T::into_data(values.into()),
            component_count,
            element_stride,
        })
    }

    /// Number of elements.
    pub fn count(&self) -> usize {
        let len = self.data.len();
        if len < self.component_count {
            0
        } else {
            (len - self.component_count) / self.element_stride + 1
        }
    }

    /// Number of values reachable through [`get`](Self::get).
    #[inline]
    pub fn addressable_count(&self) -> usize {
        self.count() * self.component_count
    }

    /// Values per element.
    #[inline]
    pub fn component_count(&self) -> usize {
        self.component_count
    }

    /// Values between the starts of consecutive elements.
    #[inline]
    pub fn element_stride(&self) -> usize {
        self.element_stride
    }

    /// Storage type.
    #[inline]
    pub fn data_type(&self) -> DataStreamType {
        self.data.data_type()
    }

    /// Check if the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Underlying storage.
    #[inline]
    pub fn data(&self) -> &VertexData<'a> {
        &self.data
    }

    /// Borrow the raw storage as `T`, if that is the storage type.
    pub fn as_slice<T: VertexElement>(&self) -> Option<&[T]> {
        T::values(&self.data)
    }

    /// Detach from any borrowed storage.
    pub fn into_owned(self) -> VertexBuffer<'static> {
        VertexBuffer {
            data: self.data.into_owned(),
            component_count: self.component_count,
            element_stride: self.element_stride,
        }
    }

    #[inline]
    fn storage_index(&self, linear: usize) -> usize {
        (linear / self.component_count) * self.element_stride + linear % self.component_count
    }

    /// Read the value at linear `index` (`element * component_count +
    /// component`) converted to `T`.
    ///
    /// Narrowing conversions truncate or saturate, see
    /// [`element`](super::element).
    pub fn get<T: VertexElement>(&self, index: usize) -> Option<T> {
        if index >= self.addressable_count() {
            return None;
        }
        self.data.get(self.storage_index(index))
    }

    /// Append up to `count` values starting at linear index `start` to
    /// `out`, converted to `T`. Returns how many were appended.
    pub fn get_range<T: VertexElement>(
        &self,
        out: &mut Vec<T>,
        start: usize,
        count: usize,
    ) -> usize {
        let end = start.saturating_add(count).min(self.addressable_count());
        if start >= end {
            return 0;
        }
        out.reserve(end - start);
        with_values!(&self.data, values => {
            for index in start..end {
                out.push(T::cast(values[self.storage_index(index)]));
            }
        });
        end - start
    }

    /// Element run that fits `max_bytes` (chunk header included), starting
    /// at `offset`.
    fn chunk_len(
        &self,
        writer: &PacketWriter,
        offset: usize,
        value_size: usize,
        max_bytes: usize,
    ) -> Result<usize> {
        if offset > u32::MAX as usize {
            return Err(TesError::InvalidArgument(format!(
                "element offset {} does not fit a chunk header",
                offset
            )));
        }

        let budget = max_bytes.min(writer.remaining());
        let remaining = self.count().saturating_sub(offset);
        let item_size = value_size * self.component_count;
        let needed = CHUNK_HEADER_SIZE + if remaining > 0 { item_size } else { 0 };
        if budget < needed {
            return Err(TesError::BufferOverflow {
                requested: needed,
                available: budget,
            });
        }

        Ok(((budget - CHUNK_HEADER_SIZE) / item_size)
            .min(remaining)
            .min(MAX_CHUNK_ELEMENTS))
    }

    /// Write the chunk of elements starting at `offset`, converted to
    /// `send_type`, using at most `max_bytes` of payload.
    ///
    /// Returns the number of elements written; advance `offset` by it and
    /// call again until it reaches [`count`](Self::count). An `offset` at or
    /// past the end writes an empty chunk and returns 0.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for `None` or a packed `send_type`.
    /// - `BufferOverflow` if not even one element fits.
    pub fn write(
        &self,
        writer: &mut PacketWriter,
        offset: usize,
        send_type: DataStreamType,
        max_bytes: usize,
    ) -> Result<usize> {
        if send_type.is_packed() || send_type == DataStreamType::None {
            return Err(TesError::InvalidArgument(format!(
                "write cannot send {}, use write_packed for quantised types",
                send_type
            )));
        }

        let count = self.chunk_len(writer, offset, send_type.size(), max_bytes)?;
        writer.write(offset as u32)?;
        writer.write(count as u16)?;

        match send_type {
            DataStreamType::Int8 => self.write_values::<i8>(writer, offset, count)?,
            DataStreamType::UInt8 => self.write_values::<u8>(writer, offset, count)?,
            DataStreamType::Int16 => self.write_values::<i16>(writer, offset, count)?,
            DataStreamType::UInt16 => self.write_values::<u16>(writer, offset, count)?,
            DataStreamType::Int32 => self.write_values::<i32>(writer, offset, count)?,
            DataStreamType::UInt32 => self.write_values::<u32>(writer, offset, count)?,
            DataStreamType::Int64 => self.write_values::<i64>(writer, offset, count)?,
            DataStreamType::UInt64 => self.write_values::<u64>(writer, offset, count)?,
            DataStreamType::Float32 => self.write_values::<f32>(writer, offset, count)?,
            DataStreamType::Float64 => self.write_values::<f64>(writer, offset, count)?,
            DataStreamType::None
            | DataStreamType::PackedFloat16
            | DataStreamType::PackedFloat32 => {}
        }
        Ok(count)
    }

    fn write_values<T: VertexElement>(
        &self,
        writer: &mut PacketWriter,
        offset: usize,
        count: usize,
    ) -> Result<()> {
        let components = self.component_count;
        let stride = self.element_stride;
        with_values!(&self.data, values => {
            for element in offset..offset + count {
                let base = element * stride;
                for value in &values[base..base + components] {
                    writer.write(T::cast(*value))?;
                }
            }
        });
        Ok(())
    }

    /// Write the chunk starting at `offset` as fixed point values:
    /// `round(value / quantization_unit)` stored as `i16` for
    /// `PackedFloat16` or `i32` for `PackedFloat32`.
    ///
    /// Decoded values are within `quantization_unit` of the originals.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a non-packed `send_type` or a unit that is
    ///   not finite and positive.
    /// - `QuantizationRange` if a value in the chunk does not fit the packed
    ///   integer. Nothing is written in that case.
    /// - `BufferOverflow` if not even one element fits.
    pub fn write_packed(
        &self,
        writer: &mut PacketWriter,
        offset: usize,
        send_type: DataStreamType,
        max_bytes: usize,
        quantization_unit: f64,
    ) -> Result<usize> {
        if !send_type.is_packed() {
            return Err(TesError::InvalidArgument(format!(
                "write_packed cannot send {}",
                send_type
            )));
        }
        validate_unit(quantization_unit)?;

        let count = self.chunk_len(writer, offset, send_type.size(), max_bytes)?;
        let (min, max) = match send_type {
            DataStreamType::PackedFloat16 => (i16::MIN as f64, i16::MAX as f64),
            _ => (i32::MIN as f64, i32::MAX as f64),
        };

        let mut quantised = Vec::with_capacity(count * self.component_count);
        let start = offset * self.component_count;
        for index in start..start + count * self.component_count {
            let value: f64 = self.get(index).unwrap_or_default();
            let q = (value / quantization_unit).round();
            if !(min..=max).contains(&q) {
                return Err(TesError::QuantizationRange {
                    value,
                    unit: quantization_unit,
                });
            }
            quantised.push(q);
        }

        writer.write(offset as u32)?;
        writer.write(count as u16)?;
        for q in quantised {
            if send_type == DataStreamType::PackedFloat16 {
                writer.write(q as i16)?;
            } else {
                writer.write(q as i32)?;
            }
        }
        Ok(count)
    }

    /// Decode one chunk from `reader` into this buffer, growing it as needed.
    ///
    /// Values are converted to the buffer's storage type. A borrowed buffer
    /// is copied into owned storage on the first read. Returns the number of
    /// elements read.
    ///
    /// A chunk may overwrite elements already held or extend the buffer
    /// directly after its last element. Storage never grows past the
    /// elements a chunk actually carries, so [`count`](Self::count) only
    /// covers decoded elements.
    ///
    /// # Errors
    ///
    /// - `InsufficientData` if the chunk is truncated. The buffer is left
    ///   unchanged.
    /// - `InvalidArgument` for a `None` send type, a bad quantisation unit,
    ///   or a chunk offset past [`count`](Self::count). The buffer is left
    ///   unchanged.
    pub fn read(&mut self, reader: &mut PacketReader, context: &ChunkContext) -> Result<usize> {
        let send_type = context.send_type;
        if send_type == DataStreamType::None {
            return Err(TesError::InvalidArgument("cannot read chunk of type None".into()));
        }
        if send_type.is_packed() {
            validate_unit(context.quantization_unit)?;
        }

        let offset = reader.read::<u32>()? as usize;
        let count = reader.read::<u16>()? as usize;
        let needed = count * self.component_count * send_type.size();
        if reader.remaining() < needed {
            return Err(TesError::InsufficientData {
                needed,
                available: reader.remaining(),
            });
        }
        if offset > self.count() {
            return Err(TesError::InvalidArgument(format!(
                "chunk offset {} leaves a gap after {} elements",
                offset,
                self.count()
            )));
        }
        if count == 0 {
            return Ok(0);
        }

        let end = offset + count;
        let required = (end - 1) * self.element_stride + self.component_count;
        let unit = context.quantization_unit;

        match send_type {
            DataStreamType::Int8 => self.read_values::<i8>(reader, offset, end, required)?,
            DataStreamType::UInt8 => self.read_values::<u8>(reader, offset, end, required)?,
            DataStreamType::Int16 => self.read_values::<i16>(reader, offset, end, required)?,
            DataStreamType::UInt16 => self.read_values::<u16>(reader, offset, end, required)?,
            DataStreamType::Int32 => self.read_values::<i32>(reader, offset, end, required)?,
            DataStreamType::UInt32 => self.read_values::<u32>(reader, offset, end, required)?,
            DataStreamType::Int64 => self.read_values::<i64>(reader, offset, end, required)?,
            DataStreamType::UInt64 => self.read_values::<u64>(reader, offset, end, required)?,
            DataStreamType::Float32 => self.read_values::<f32>(reader, offset, end, required)?,
            DataStreamType::Float64 => self.read_values::<f64>(reader, offset, end, required)?,
            DataStreamType::PackedFloat16 => {
                self.read_packed::<i16>(reader, offset, end, required, unit)?
            }
            DataStreamType::PackedFloat32 => {
                self.read_packed::<i32>(reader, offset, end, required, unit)?
            }
            DataStreamType::None => {}
        }
        Ok(count)
    }

    fn read_values<W: VertexElement>(
        &mut self,
        reader: &mut PacketReader,
        offset: usize,
        end: usize,
        required: usize,
    ) -> Result<()> {
        self.fill(reader, offset, end, required, |reader| reader.read::<W>())
    }

    fn read_packed<W: VertexElement>(
        &mut self,
        reader: &mut PacketReader,
        offset: usize,
        end: usize,
        required: usize,
        unit: f64,
    ) -> Result<()> {
        self.fill(reader, offset, end, required, |reader| {
            Ok(reader.read::<W>()?.to_f64() * unit)
        })
    }

    /// Store elements `offset..end` decoded by `next`, growing storage to at
    /// least `required` values.
    fn fill<V, F>(
        &mut self,
        reader: &mut PacketReader,
        offset: usize,
        end: usize,
        required: usize,
        mut next: F,
    ) -> Result<()>
    where
        V: VertexElement,
        F: FnMut(&mut PacketReader) -> Result<V>,
    {
        let components = self.component_count;
        let stride = self.element_stride;
        with_values!(&mut self.data, values => {
            let values = values.to_mut();
            if values.len() < required {
                grow(values, required);
            }
            for element in offset..end {
                let base = element * stride;
                for slot in &mut values[base..base + components] {
                    *slot = VertexElement::cast(next(reader)?);
                }
            }
        });
        Ok(())
    }
}

impl VertexBuffer<'static> {
    /// Empty owned buffer that stores values of `data_type` (packed types
    /// store their float type), ready to be filled by [`read`](Self::read).
    pub fn new(data_type: DataStreamType, component_count: usize) -> Result<Self> {
        Self::new_strided(data_type, component_count, component_count)
    }

    /// Empty owned buffer with padded elements.
    pub fn new_strided(
        data_type: DataStreamType,
        component_count: usize,
        element_stride: usize,
    ) -> Result<Self> {
        validate_layout(component_count, element_stride)?;
        let data = VertexData::empty(data_type).ok_or_else(|| {
            TesError::InvalidArgument(format!("no storage for data type {}", data_type))
        })?;
        Ok(Self {
            data,
            component_count,
            element_stride,
        })
    }
}

impl<T: VertexElement> From<Vec<T>> for VertexBuffer<'static> {
    /// Wrap scalars (one component per element).
    fn from(values: Vec<T>) -> Self {
        Self {
            data: T::into_data(Cow::Owned(values)),
            component_count: 1,
            element_stride: 1,
        }
    }
}

/// Grow to `required` values, at least doubling capacity.
fn grow<S: VertexElement>(values: &mut Vec<S>, required: usize) {
    if required > values.capacity() {
        let target = required.max(values.capacity() * 2);
        values.reserve_exact(target - values.len());
    }
    values.resize(required, S::default());
}

fn validate_layout(component_count: usize, element_stride: usize) -> Result<()> {
    if component_count == 0 {
        return Err(TesError::InvalidArgument(
            "component count must be at least 1".into(),
        ));
    }
    if element_stride < component_count {
        return Err(TesError::InvalidArgument(format!(
            "element stride {} is smaller than component count {}",
            element_stride, component_count
        )));
    }
    Ok(())
}

fn validate_unit(unit: f64) -> Result<()> {
    if !(unit.is_finite() && unit > 0.0) {
        return Err(TesError::InvalidArgument(format!(
            "quantisation unit must be finite and positive, got {}",
            unit
        )));
    }
    Ok(())
}
