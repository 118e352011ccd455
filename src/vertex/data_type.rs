//! Wire data types for vertex streams.

use std::fmt;

use crate::error::TesError;

/// Element encoding used when streaming a vertex buffer.
///
/// The packed types are not storage types. They carry floating point data
/// quantised to fixed point: `PackedFloat16` stores `f32` values as `i16`,
/// `PackedFloat32` stores `f64` values as `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataStreamType {
    /// No data.
    None = 0,
    /// `i8`
    Int8 = 1,
    /// `u8`
    UInt8 = 2,
    /// `i16`
    Int16 = 3,
    /// `u16`
    UInt16 = 4,
    /// `i32`
    Int32 = 5,
    /// `u32`
    UInt32 = 6,
    /// `i64`
    Int64 = 7,
    /// `u64`
    UInt64 = 8,
    /// `f32`
    Float32 = 9,
    /// `f64`
    Float64 = 10,
    /// `f32` quantised to `i16`.
    PackedFloat16 = 11,
    /// `f64` quantised to `i32`.
    PackedFloat32 = 12,
}

impl DataStreamType {
    /// Every type, in tag order.
    pub const ALL: [DataStreamType; 13] = [
        Self::None,
        Self::Int8,
        Self::UInt8,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Float32,
        Self::Float64,
        Self::PackedFloat16,
        Self::PackedFloat32,
    ];

    /// Bytes per value on the wire.
    pub const fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::PackedFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 | Self::PackedFloat32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Check if this is a quantised encoding.
    #[inline]
    pub const fn is_packed(self) -> bool {
        matches!(self, Self::PackedFloat16 | Self::PackedFloat32)
    }

    /// Check if values are floating point, packed or not.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            Self::Float32 | Self::Float64 | Self::PackedFloat16 | Self::PackedFloat32
        )
    }

    /// In-memory type that holds values of this encoding, `None` for
    /// [`DataStreamType::None`].
    pub const fn storage_type(self) -> Option<DataStreamType> {
        match self {
            Self::None => None,
            Self::PackedFloat16 => Some(Self::Float32),
            Self::PackedFloat32 => Some(Self::Float64),
            other => Some(other),
        }
    }

    /// Tag byte.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for DataStreamType {
    type Error = TesError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or_else(|| TesError::InvalidArgument(format!("unknown data stream type {}", tag)))
    }
}

impl fmt::Display for DataStreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_match_position() {
        for (tag, ty) in DataStreamType::ALL.iter().enumerate() {
            assert_eq!(ty.as_u8() as usize, tag);
            assert_eq!(DataStreamType::try_from(tag as u8).unwrap(), *ty);
        }
        assert!(DataStreamType::try_from(13).is_err());
    }

    #[test]
    fn test_sizes() {
        assert_eq!(DataStreamType::Int8.size(), 1);
        assert_eq!(DataStreamType::UInt16.size(), 2);
        assert_eq!(DataStreamType::Float32.size(), 4);
        assert_eq!(DataStreamType::Float64.size(), 8);
        assert_eq!(DataStreamType::PackedFloat16.size(), 2);
        assert_eq!(DataStreamType::PackedFloat32.size(), 4);
    }

    #[test]
    fn test_packed_storage() {
        assert!(DataStreamType::PackedFloat16.is_packed());
        assert!(!DataStreamType::Float32.is_packed());
        assert_eq!(
            DataStreamType::PackedFloat16.storage_type(),
            Some(DataStreamType::Float32)
        );
        assert_eq!(
            DataStreamType::PackedFloat32.storage_type(),
            Some(DataStreamType::Float64)
        );
        assert_eq!(DataStreamType::None.storage_type(), None);
        assert!(DataStreamType::PackedFloat32.is_float());
        assert!(!DataStreamType::UInt64.is_float());
    }
}
