//! NDR primitive scalars
//!
//! NDR primitive types and their encodings:
//!
//! | MIDL Type      | Scalar     | NDR size | NDR64 size |
//! |----------------|------------|----------|------------|
//! | boolean/byte   | U8         | 1        | 1          |
//! | small          | I8         | 1        | 1          |
//! | short          | I16        | 2        | 2          |
//! | wchar_t        | U16        | 2        | 2          |
//! | long           | I32        | 4        | 4          |
//! | error_status_t | U32        | 4        | 4          |
//! | hyper          | I64        | 8        | 8          |
//! | float          | F32        | 4        | 4          |
//! | double         | F64        | 8        | 8          |
//! | __int3264      | Int3264    | 4        | 8          |
//! | __uint3264     | Uint3264   | 4        | 8          |
//!
//! Every scalar aligns to its own wire size.

use bytes::{Buf, BufMut};

use crate::NdrContext;

/// Wire kind of a primitive scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    /// 32 bits under NDR, 64 bits under NDR64
    Int3264,
    /// 32 bits under NDR, 64 bits under NDR64
    Uint3264,
}

impl ScalarKind {
    /// Wire size in bytes for the given transfer syntax
    pub fn size(self, ndr64: bool) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
            Self::Int3264 | Self::Uint3264 => {
                if ndr64 {
                    8
                } else {
                    4
                }
            }
        }
    }

    /// Natural alignment (equal to the wire size)
    pub fn alignment(self, ndr64: bool) -> usize {
        self.size(ndr64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::Int3264 | Self::F32 | Self::F64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// A primitive value as it travels on the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Int3264(i64),
    Uint3264(u64),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::U8(_) => ScalarKind::U8,
            Self::I8(_) => ScalarKind::I8,
            Self::U16(_) => ScalarKind::U16,
            Self::I16(_) => ScalarKind::I16,
            Self::U32(_) => ScalarKind::U32,
            Self::I32(_) => ScalarKind::I32,
            Self::U64(_) => ScalarKind::U64,
            Self::I64(_) => ScalarKind::I64,
            Self::F32(_) => ScalarKind::F32,
            Self::F64(_) => ScalarKind::F64,
            Self::Int3264(_) => ScalarKind::Int3264,
            Self::Uint3264(_) => ScalarKind::Uint3264,
        }
    }

    /// Zero value of the given kind
    pub fn zero(kind: ScalarKind) -> Self {
        Self::from_i64(kind, 0)
    }

    /// Build a scalar of `kind` from an integer, truncating to the wire width
    pub fn from_i64(kind: ScalarKind, value: i64) -> Self {
        match kind {
            ScalarKind::U8 => Self::U8(value as u8),
            ScalarKind::I8 => Self::I8(value as i8),
            ScalarKind::U16 => Self::U16(value as u16),
            ScalarKind::I16 => Self::I16(value as i16),
            ScalarKind::U32 => Self::U32(value as u32),
            ScalarKind::I32 => Self::I32(value as i32),
            ScalarKind::U64 => Self::U64(value as u64),
            ScalarKind::I64 => Self::I64(value),
            ScalarKind::F32 => Self::F32(value as f32),
            ScalarKind::F64 => Self::F64(value as f64),
            ScalarKind::Int3264 => Self::Int3264(value),
            ScalarKind::Uint3264 => Self::Uint3264(value as u64),
        }
    }

    /// Build a floating point scalar; integer kinds truncate toward zero
    pub fn from_f64(kind: ScalarKind, value: f64) -> Self {
        match kind {
            ScalarKind::F32 => Self::F32(value as f32),
            ScalarKind::F64 => Self::F64(value),
            other => Self::from_i64(other, value as i64),
        }
    }

    /// Integer view of the scalar (floats truncate toward zero)
    pub fn as_i64(&self) -> i64 {
        match *self {
            Self::U8(v) => v as i64,
            Self::I8(v) => v as i64,
            Self::U16(v) => v as i64,
            Self::I16(v) => v as i64,
            Self::U32(v) => v as i64,
            Self::I32(v) => v as i64,
            Self::U64(v) => v as i64,
            Self::I64(v) => v,
            Self::F32(v) => v as i64,
            Self::F64(v) => v as i64,
            Self::Int3264(v) => v,
            Self::Uint3264(v) => v as i64,
        }
    }

    /// Write the scalar without alignment
    pub(crate) fn put<B: BufMut>(&self, ctx: &NdrContext, buf: &mut B) {
        match *self {
            Self::U8(v) => buf.put_u8(v),
            Self::I8(v) => buf.put_i8(v),
            Self::U16(v) => ctx.put_u16(buf, v),
            Self::I16(v) => ctx.put_i16(buf, v),
            Self::U32(v) => ctx.put_u32(buf, v),
            Self::I32(v) => ctx.put_i32(buf, v),
            Self::U64(v) => ctx.put_u64(buf, v),
            Self::I64(v) => ctx.put_i64(buf, v),
            Self::F32(v) => ctx.put_f32(buf, v),
            Self::F64(v) => ctx.put_f64(buf, v),
            Self::Int3264(v) => {
                if ctx.ndr64 {
                    ctx.put_i64(buf, v)
                } else {
                    ctx.put_i32(buf, v as i32)
                }
            }
            Self::Uint3264(v) => {
                if ctx.ndr64 {
                    ctx.put_u64(buf, v)
                } else {
                    ctx.put_u32(buf, v as u32)
                }
            }
        }
    }

    /// Read a scalar of `kind`. The caller guarantees enough input remains.
    pub(crate) fn get<B: Buf>(kind: ScalarKind, ctx: &NdrContext, buf: &mut B) -> Self {
        match kind {
            ScalarKind::U8 => Self::U8(buf.get_u8()),
            ScalarKind::I8 => Self::I8(buf.get_i8()),
            ScalarKind::U16 => Self::U16(ctx.get_u16(buf)),
            ScalarKind::I16 => Self::I16(ctx.get_i16(buf)),
            ScalarKind::U32 => Self::U32(ctx.get_u32(buf)),
            ScalarKind::I32 => Self::I32(ctx.get_i32(buf)),
            ScalarKind::U64 => Self::U64(ctx.get_u64(buf)),
            ScalarKind::I64 => Self::I64(ctx.get_i64(buf)),
            ScalarKind::F32 => Self::F32(ctx.get_f32(buf)),
            ScalarKind::F64 => Self::F64(ctx.get_f64(buf)),
            ScalarKind::Int3264 => {
                if ctx.ndr64 {
                    Self::Int3264(ctx.get_i64(buf))
                } else {
                    Self::Int3264(ctx.get_i32(buf) as i64)
                }
            }
            ScalarKind::Uint3264 => {
                if ctx.ndr64 {
                    Self::Uint3264(ctx.get_u64(buf))
                } else {
                    Self::Uint3264(ctx.get_u32(buf) as u64)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(ScalarKind::U8.size(false), 1);
        assert_eq!(ScalarKind::I16.size(false), 2);
        assert_eq!(ScalarKind::F32.size(false), 4);
        assert_eq!(ScalarKind::F64.size(false), 8);
        assert_eq!(ScalarKind::Int3264.size(false), 4);
        assert_eq!(ScalarKind::Int3264.size(true), 8);
        assert_eq!(ScalarKind::Uint3264.alignment(true), 8);
    }

    #[test]
    fn test_int3264_dual_representation() {
        let ndr = NdrContext::new();
        let mut buf = BytesMut::new();
        Scalar::Int3264(-2).put(&ndr, &mut buf);
        assert_eq!(buf.len(), 4);
        let mut reader = buf.freeze();
        assert_eq!(Scalar::get(ScalarKind::Int3264, &ndr, &mut reader), Scalar::Int3264(-2));

        let ndr64 = NdrContext::new().with_ndr64(true);
        let mut buf = BytesMut::new();
        Scalar::Uint3264(0x1_0000_0001).put(&ndr64, &mut buf);
        assert_eq!(buf.len(), 8);
        let mut reader = buf.freeze();
        assert_eq!(
            Scalar::get(ScalarKind::Uint3264, &ndr64, &mut reader),
            Scalar::Uint3264(0x1_0000_0001)
        );
    }

    #[test]
    fn test_from_i64_truncates() {
        assert_eq!(Scalar::from_i64(ScalarKind::U8, 0x1ff), Scalar::U8(0xff));
        assert_eq!(Scalar::from_i64(ScalarKind::I16, -1).as_i64(), -1);
        assert_eq!(Scalar::from_i64(ScalarKind::U16, -1).as_i64(), 0xffff);
    }
}
