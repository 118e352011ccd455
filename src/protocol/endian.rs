//! Network byte order helpers.
//!
//! Every multi-byte value on the wire is Big Endian, floats included (the
//! IEEE-754 bit pattern is sent Big Endian). All encode and decode paths go
//! through [`WireScalar`] so the two directions cannot drift apart.

use bytes::{Buf, BufMut};

/// A fixed-width scalar that can be written to and read from the wire.
pub trait WireScalar: Copy + Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Write `self` in network byte order.
    fn put<B: BufMut>(self, buf: &mut B);

    /// Read a value in network byte order.
    ///
    /// The caller guarantees `buf.remaining() >= Self::SIZE`.
    fn get<B: Buf>(buf: &mut B) -> Self;

    /// Read a value from the start of `bytes`, or `None` if too short.
    #[inline]
    fn from_slice(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self::get(&mut bytes))
    }
}

macro_rules! impl_wire_scalar {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl WireScalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn put<B: BufMut>(self, buf: &mut B) {
                    buf.$put(self);
                }

                #[inline]
                fn get<B: Buf>(buf: &mut B) -> Self {
                    buf.$get()
                }
            }
        )*
    };
}

impl_wire_scalar! {
    u8 => put_u8, get_u8;
    i8 => put_i8, get_i8;
    u16 => put_u16, get_u16;
    i16 => put_i16, get_i16;
    u32 => put_u32, get_u32;
    i32 => put_i32, get_i32;
    u64 => put_u64, get_u64;
    i64 => put_i64, get_i64;
    f32 => put_f32, get_f32;
    f64 => put_f64, get_f64;
}
