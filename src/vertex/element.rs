//! Storage element types and the cross-type conversion table.
//!
//! Every conversion between the ten storage types goes through an explicit
//! `to_*` method generated for each source type, using Rust's `as` rules:
//!
//! - integer to narrower integer keeps the low bits (wraps),
//! - integer to wider integer sign or zero extends,
//! - float to integer truncates toward zero and saturates at the target
//!   bounds, NaN becomes 0,
//! - integer to float and `f64` to `f32` round to nearest.
//!
//! Narrowing is a defined conversion, not an error.

use std::borrow::Cow;
use std::fmt;

use super::data_type::DataStreamType;
use crate::protocol::WireScalar;

/// A numeric type a [`VertexBuffer`](super::VertexBuffer) can store or be
/// read as.
pub trait VertexElement:
    WireScalar + Default + PartialEq + PartialOrd + fmt::Debug + Send + Sync + 'static
{
    /// Matching wire type.
    const DATA_TYPE: DataStreamType;

    /// Convert to `i8`.
    fn to_i8(self) -> i8;
    /// Convert to `u8`.
    fn to_u8(self) -> u8;
    /// Convert to `i16`.
    fn to_i16(self) -> i16;
    /// Convert to `u16`.
    fn to_u16(self) -> u16;
    /// Convert to `i32`.
    fn to_i32(self) -> i32;
    /// Convert to `u32`.
    fn to_u32(self) -> u32;
    /// Convert to `i64`.
    fn to_i64(self) -> i64;
    /// Convert to `u64`.
    fn to_u64(self) -> u64;
    /// Convert to `f32`.
    fn to_f32(self) -> f32;
    /// Convert to `f64`.
    fn to_f64(self) -> f64;

    /// Convert any element type into this one.
    fn cast<S: VertexElement>(value: S) -> Self;

    /// Wrap a slice in the matching storage variant.
    fn into_data<'a>(values: Cow<'a, [Self]>) -> VertexData<'a>;

    /// Borrow the storage as this type, if it is this type.
    fn values<'b>(data: &'b VertexData<'_>) -> Option<&'b [Self]>;
}

macro_rules! impl_vertex_element {
    ($($ty:ty => $variant:ident, $to:ident;)*) => {
        $(
            impl VertexElement for $ty {
                const DATA_TYPE: DataStreamType = DataStreamType::$variant;

                #[inline] fn to_i8(self) -> i8 { self as i8 }
                #[inline] fn to_u8(self) -> u8 { self as u8 }
                #[inline] fn to_i16(self) -> i16 { self as i16 }
                #[inline] fn to_u16(self) -> u16 { self as u16 }
                #[inline] fn to_i32(self) -> i32 { self as i32 }
                #[inline] fn to_u32(self) -> u32 { self as u32 }
                #[inline] fn to_i64(self) -> i64 { self as i64 }
                #[inline] fn to_u64(self) -> u64 { self as u64 }
                #[inline] fn to_f32(self) -> f32 { self as f32 }
                #[inline] fn to_f64(self) -> f64 { self as f64 }

                #[inline]
                fn cast<S: VertexElement>(value: S) -> Self {
                    value.$to()
                }

                fn into_data<'a>(values: Cow<'a, [Self]>) -> VertexData<'a> {
                    VertexData::$variant(values)
                }

                fn values<'b>(data: &'b VertexData<'_>) -> Option<&'b [Self]> {
                    match data {
                        VertexData::$variant(values) => Some(&values[..]),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_vertex_element! {
    i8 => Int8, to_i8;
    u8 => UInt8, to_u8;
    i16 => Int16, to_i16;
    u16 => UInt16, to_u16;
    i32 => Int32, to_i32;
    u32 => UInt32, to_u32;
    i64 => Int64, to_i64;
    u64 => UInt64, to_u64;
    f32 => Float32, to_f32;
    f64 => Float64, to_f64;
}

/// Flat numeric storage of one element type, borrowed or owned.
#[derive(Debug, Clone, PartialEq)]
pub enum VertexData<'a> {
    /// `i8` values.
    Int8(Cow<'a, [i8]>),
    /// `u8` values.
    UInt8(Cow<'a, [u8]>),
    /// `i16` values.
    Int16(Cow<'a, [i16]>),
    /// `u16` values.
    UInt16(Cow<'a, [u16]>),
    /// `i32` values.
    Int32(Cow<'a, [i32]>),
    /// `u32` values.
    UInt32(Cow<'a, [u32]>),
    /// `i64` values.
    Int64(Cow<'a, [i64]>),
    /// `u64` values.
    UInt64(Cow<'a, [u64]>),
    /// `f32` values.
    Float32(Cow<'a, [f32]>),
    /// `f64` values.
    Float64(Cow<'a, [f64]>),
}

/// Run `$body` with `$values` bound to the storage of whichever variant
/// `$data` holds.
macro_rules! with_values {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            VertexData::Int8($values) => $body,
            VertexData::UInt8($values) => $body,
            VertexData::Int16($values) => $body,
            VertexData::UInt16($values) => $body,
            VertexData::Int32($values) => $body,
            VertexData::UInt32($values) => $body,
            VertexData::Int64($values) => $body,
            VertexData::UInt64($values) => $body,
            VertexData::Float32($values) => $body,
            VertexData::Float64($values) => $body,
        }
    };
}

pub(crate) use with_values;

impl<'a> VertexData<'a> {
    /// Empty owned storage for `data_type`. Packed types map to their float
    /// storage; `None` has no storage.
    pub fn empty(data_type: DataStreamType) -> Option<VertexData<'static>> {
        let data = match data_type.storage_type()? {
            DataStreamType::Int8 => VertexData::Int8(Cow::Owned(Vec::new())),
            DataStreamType::UInt8 => VertexData::UInt8(Cow::Owned(Vec::new())),
            DataStreamType::Int16 => VertexData::Int16(Cow::Owned(Vec::new())),
            DataStreamType::UInt16 => VertexData::UInt16(Cow::Owned(Vec::new())),
            DataStreamType::Int32 => VertexData::Int32(Cow::Owned(Vec::new())),
            DataStreamType::UInt32 => VertexData::UInt32(Cow::Owned(Vec::new())),
            DataStreamType::Int64 => VertexData::Int64(Cow::Owned(Vec::new())),
            DataStreamType::UInt64 => VertexData::UInt64(Cow::Owned(Vec::new())),
            DataStreamType::Float32 => VertexData::Float32(Cow::Owned(Vec::new())),
            DataStreamType::Float64 => VertexData::Float64(Cow::Owned(Vec::new())),
            DataStreamType::None
            | DataStreamType::PackedFloat16
            | DataStreamType::PackedFloat32 => return None,
        };
        Some(data)
    }

    /// Storage type tag.
    pub fn data_type(&self) -> DataStreamType {
        with_values!(self, values => element_type(&values[..]))
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        with_values!(self, values => values.len())
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the storage is borrowed from the caller.
    pub fn is_borrowed(&self) -> bool {
        with_values!(self, values => matches!(values, Cow::Borrowed(_)))
    }

    /// Read the value at `index` converted to `T`.
    #[inline]
    pub fn get<T: VertexElement>(&self, index: usize) -> Option<T> {
        with_values!(self, values => values.get(index).map(|&v| T::cast(v)))
    }

    /// Detach from any borrowed storage.
    pub fn into_owned(self) -> VertexData<'static> {
        match self {
            VertexData::Int8(v) => VertexData::Int8(Cow::Owned(v.into_owned())),
            VertexData::UInt8(v) => VertexData::UInt8(Cow::Owned(v.into_owned())),
            VertexData::Int16(v) => VertexData::Int16(Cow::Owned(v.into_owned())),
            VertexData::UInt16(v) => VertexData::UInt16(Cow::Owned(v.into_owned())),
            VertexData::Int32(v) => VertexData::Int32(Cow::Owned(v.into_owned())),
            VertexData::UInt32(v) => VertexData::UInt32(Cow::Owned(v.into_owned())),
            VertexData::Int64(v) => VertexData::Int64(Cow::Owned(v.into_owned())),
            VertexData::UInt64(v) => VertexData::UInt64(Cow::Owned(v.into_owned())),
            VertexData::Float32(v) => VertexData::Float32(Cow::Owned(v.into_owned())),
            VertexData::Float64(v) => VertexData::Float64(Cow::Owned(v.into_owned())),
        }
    }
}

fn element_type<S: VertexElement>(_: &[S]) -> DataStreamType {
    S::DATA_TYPE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_to_int_truncates() {
        assert_eq!(i32::cast(3.9f32), 3);
        assert_eq!(i32::cast(-3.9f64), -3);
        assert_eq!(u8::cast(200.7f32), 200);
    }

    #[test]
    fn test_float_to_int_saturates() {
        assert_eq!(i8::cast(1000.0f32), i8::MAX);
        assert_eq!(u16::cast(-5.0f64), 0);
        assert_eq!(i64::cast(f64::INFINITY), i64::MAX);
        assert_eq!(i32::cast(f32::NAN), 0);
    }

    #[test]
    fn test_integer_narrowing_wraps() {
        assert_eq!(u8::cast(0x1234u16), 0x34);
        assert_eq!(i8::cast(200u8), -56);
        assert_eq!(u32::cast(-1i64), u32::MAX);
    }

    #[test]
    fn test_widening_is_exact() {
        assert_eq!(i64::cast(-7i8), -7);
        assert_eq!(u64::cast(u32::MAX), u32::MAX as u64);
        assert_eq!(f64::cast(1.5f32), 1.5);
        assert_eq!(f32::cast(16_777_216i32), 16_777_216.0);
    }

    #[test]
    fn test_every_pair_converts() {
        // One representative value through all 100 (stored, requested) pairs.
        let data = [
            VertexData::Int8(Cow::Owned(vec![42])),
            VertexData::UInt8(Cow::Owned(vec![42])),
            VertexData::Int16(Cow::Owned(vec![42])),
            VertexData::UInt16(Cow::Owned(vec![42])),
            VertexData::Int32(Cow::Owned(vec![42])),
            VertexData::UInt32(Cow::Owned(vec![42])),
            VertexData::Int64(Cow::Owned(vec![42])),
            VertexData::UInt64(Cow::Owned(vec![42])),
            VertexData::Float32(Cow::Owned(vec![42.0])),
            VertexData::Float64(Cow::Owned(vec![42.0])),
        ];
        for stored in &data {
            assert_eq!(stored.get::<i8>(0), Some(42));
            assert_eq!(stored.get::<u8>(0), Some(42));
            assert_eq!(stored.get::<i16>(0), Some(42));
            assert_eq!(stored.get::<u16>(0), Some(42));
            assert_eq!(stored.get::<i32>(0), Some(42));
            assert_eq!(stored.get::<u32>(0), Some(42));
            assert_eq!(stored.get::<i64>(0), Some(42));
            assert_eq!(stored.get::<u64>(0), Some(42));
            assert_eq!(stored.get::<f32>(0), Some(42.0));
            assert_eq!(stored.get::<f64>(0), Some(42.0));
            assert_eq!(stored.get::<f64>(1), None);
        }
    }

    #[test]
    fn test_empty_storage_types() {
        assert_eq!(
            VertexData::empty(DataStreamType::PackedFloat16)
                .unwrap()
                .data_type(),
            DataStreamType::Float32
        );
        assert_eq!(
            VertexData::empty(DataStreamType::UInt16).unwrap().data_type(),
            DataStreamType::UInt16
        );
        assert!(VertexData::empty(DataStreamType::None).is_none());
    }

    #[test]
    fn test_borrowed_and_owned() {
        let source = [1.0f32, 2.0];
        let data = f32::into_data(Cow::Borrowed(&source[..]));
        assert!(data.is_borrowed());
        assert_eq!(f32::values(&data), Some(&source[..]));
        assert_eq!(i32::values(&data), None);

        let owned = data.into_owned();
        assert!(!owned.is_borrowed());
        assert_eq!(owned.len(), 2);
    }
}
