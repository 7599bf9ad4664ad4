//! NDR writer contract
//!
//! The codec talks to the wire only through [`NdrWrite`]. The `position`
//! tracked by a writer is the byte offset from the start of the stub data,
//! which is what every alignment is computed against.

use bytes::{BufMut, Bytes, BytesMut};

use crate::pointers::ReferentIds;
use crate::{NdrContext, Scalar};

/// Writer side of the NDR transfer syntax
pub trait NdrWrite {
    /// Data representation negotiated for this call
    fn context(&self) -> &NdrContext;

    /// Current offset from the start of the stub data
    fn position(&self) -> usize;

    /// Emit zero padding up to the next multiple of `alignment`
    fn write_align(&mut self, alignment: usize);

    /// Write a primitive at its natural alignment
    fn write_data(&mut self, value: Scalar);

    /// Write a conformance or variance header (max count, offset, actual count).
    /// NDR20 sizes above `u32::MAX` are clamped.
    fn write_size(&mut self, size: u64);

    /// Write a pointer marker, returning the referent id used (0 for null)
    fn write_pointer(&mut self, is_null: bool) -> u64;

    /// Write raw bytes without alignment
    fn write_bytes(&mut self, bytes: &[u8]);

    /// Write a union discriminant
    fn write_switch(&mut self, discriminant: Scalar) {
        self.write_data(discriminant);
    }
}

/// [`NdrWrite`] implementation over a growable byte buffer
#[derive(Debug)]
pub struct NdrWriter {
    buf: BytesMut,
    ctx: NdrContext,
    referents: ReferentIds,
}

impl NdrWriter {
    pub fn new(ctx: NdrContext) -> Self {
        Self {
            buf: BytesMut::new(),
            ctx,
            referents: ReferentIds::new(),
        }
    }

    pub fn with_capacity(ctx: NdrContext, capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            ctx,
            referents: ReferentIds::new(),
        }
    }

    /// Bytes written so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish writing and hand out the stub data
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for NdrWriter {
    fn default() -> Self {
        Self::new(NdrContext::default())
    }
}

impl NdrWrite for NdrWriter {
    fn context(&self) -> &NdrContext {
        &self.ctx
    }

    fn position(&self) -> usize {
        self.buf.len()
    }

    fn write_align(&mut self, alignment: usize) {
        let padding = NdrContext::align_padding(self.buf.len(), alignment);
        self.buf.put_bytes(0, padding);
    }

    fn write_data(&mut self, value: Scalar) {
        self.write_align(value.kind().alignment(self.ctx.ndr64));
        value.put(&self.ctx, &mut self.buf);
    }

    fn write_size(&mut self, size: u64) {
        if self.ctx.ndr64 {
            self.write_data(Scalar::U64(size));
        } else {
            let narrow = u32::try_from(size).unwrap_or_else(|_| {
                tracing::warn!(size, "size exceeds the NDR20 range, clamped");
                u32::MAX
            });
            self.write_data(Scalar::U32(narrow));
        }
    }

    fn write_pointer(&mut self, is_null: bool) -> u64 {
        let referent = if is_null { 0 } else { self.referents.next_id() };
        self.write_size(referent);
        referent
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_data_aligns_naturally() {
        let mut w = NdrWriter::default();
        w.write_data(Scalar::U8(1));
        w.write_data(Scalar::U32(0x11223344));
        w.write_data(Scalar::U16(0xaabb));
        w.write_data(Scalar::U64(7));
        assert_eq!(
            w.as_bytes(),
            &[
                1, 0, 0, 0, 0x44, 0x33, 0x22, 0x11, 0xbb, 0xaa, 0, 0, 0, 0, 0, 0, 7, 0, 0, 0, 0,
                0, 0, 0
            ]
        );
    }

    #[test]
    fn test_write_size_clamps_to_ndr20_range() {
        let mut w = NdrWriter::default();
        w.write_size(u64::from(u32::MAX) + 5);
        assert_eq!(w.as_bytes(), &[0xff, 0xff, 0xff, 0xff]);

        let mut w = NdrWriter::new(NdrContext::default().with_ndr64(true));
        w.write_size(u64::from(u32::MAX) + 5);
        assert_eq!(w.as_bytes(), &[4, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_write_pointer_markers() {
        let mut w = NdrWriter::default();
        assert_eq!(w.write_pointer(true), 0);
        let first = w.write_pointer(false);
        let second = w.write_pointer(false);
        assert_ne!(first, 0);
        assert_ne!(first, second);
        assert_eq!(w.len(), 12);
    }

    #[test]
    fn test_ndr64_size_header() {
        let mut w = NdrWriter::new(NdrContext::new().with_ndr64(true));
        w.write_data(Scalar::U8(1));
        w.write_size(3);
        assert_eq!(w.len(), 16);
        assert_eq!(&w.as_bytes()[8..], &[3, 0, 0, 0, 0, 0, 0, 0]);
    }
}
