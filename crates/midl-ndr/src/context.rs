//! NDR encoding/decoding context
//!
//! The context carries the negotiated data representation for one call
//! (byte order, transfer syntax) together with the decoder limits, and
//! provides helpers for alignment and primitive encoding/decoding.

use bytes::{Buf, BufMut};

use crate::error::MAX_NDR_ARRAY_ELEMENTS;

/// NDR encoding/decoding context
///
/// A plain `Copy` value: every marshal/unmarshal call gets its own copy,
/// so no configuration is shared between concurrent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdrContext {
    /// Whether to use little-endian byte order
    pub little_endian: bool,
    /// NDR64 transfer syntax: `__int3264` integers, size headers and
    /// pointer markers are 8 bytes wide
    pub ndr64: bool,
    /// Maximum number of elements the decoder allocates for one array
    pub max_elements: usize,
    /// Substitute the sibling size expression when a conformant array
    /// header reads zero
    pub opaque_size_hint: bool,
}

impl NdrContext {
    /// Create a new NDR context with little-endian byte order (default)
    pub fn new() -> Self {
        Self {
            little_endian: true,
            ndr64: false,
            max_elements: MAX_NDR_ARRAY_ELEMENTS,
            opaque_size_hint: true,
        }
    }

    /// Create a context with big-endian byte order
    pub fn big_endian() -> Self {
        Self {
            little_endian: false,
            ..Self::new()
        }
    }

    /// Switch to the NDR64 transfer syntax
    pub fn with_ndr64(mut self, ndr64: bool) -> Self {
        self.ndr64 = ndr64;
        self
    }

    /// Override the decoder allocation ceiling
    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }

    /// Enable or disable the zero-header size hint fallback
    pub fn with_opaque_size_hint(mut self, enabled: bool) -> Self {
        self.opaque_size_hint = enabled;
        self
    }

    /// Wire width of size headers and pointer markers
    #[inline]
    pub fn size_width(&self) -> usize {
        if self.ndr64 {
            8
        } else {
            4
        }
    }

    /// Calculate padding needed to align to the given boundary
    #[inline]
    pub fn align_padding(position: usize, alignment: usize) -> usize {
        if alignment == 0 || alignment == 1 {
            return 0;
        }
        let remainder = position % alignment;
        if remainder == 0 {
            0
        } else {
            alignment - remainder
        }
    }
}

/// `put_*`/`get_*` pairs for the multi-byte scalars, honouring the
/// context's byte order. Readers must check `remaining()` first.
macro_rules! byte_order_accessors {
    ($($ty:ty => $put:ident, $put_le:ident, $get:ident, $get_le:ident;)*) => {
        impl NdrContext {
            $(
                #[inline]
                pub fn $put<B: BufMut>(&self, buf: &mut B, value: $ty) {
                    if self.little_endian {
                        buf.$put_le(value);
                    } else {
                        buf.$put(value);
                    }
                }

                #[inline]
                pub fn $get<B: Buf>(&self, buf: &mut B) -> $ty {
                    if self.little_endian {
                        buf.$get_le()
                    } else {
                        buf.$get()
                    }
                }
            )*
        }
    };
}

byte_order_accessors! {
    u16 => put_u16, put_u16_le, get_u16, get_u16_le;
    i16 => put_i16, put_i16_le, get_i16, get_i16_le;
    u32 => put_u32, put_u32_le, get_u32, get_u32_le;
    i32 => put_i32, put_i32_le, get_i32, get_i32_le;
    u64 => put_u64, put_u64_le, get_u64, get_u64_le;
    i64 => put_i64, put_i64_le, get_i64, get_i64_le;
    f32 => put_f32, put_f32_le, get_f32, get_f32_le;
    f64 => put_f64, put_f64_le, get_f64, get_f64_le;
}

impl Default for NdrContext {
    fn default() -> Self {
        Self::new()
    }
}
