//! NDR reader contract

use bytes::{Buf, Bytes};

use crate::{NdrContext, NdrError, Result, Scalar, ScalarKind};

/// Reader side of the NDR transfer syntax
pub trait NdrRead {
    /// Data representation negotiated for this call
    fn context(&self) -> &NdrContext;

    /// Current offset from the start of the stub data
    fn position(&self) -> usize;

    /// Bytes left in the input
    fn remaining(&self) -> usize;

    /// Skip padding up to the next multiple of `alignment`
    fn read_align(&mut self, alignment: usize) -> Result<()>;

    /// Read a primitive at its natural alignment
    fn read_data(&mut self, kind: ScalarKind) -> Result<Scalar>;

    /// Read a conformance or variance header
    fn read_size(&mut self) -> Result<u64>;

    /// Read a pointer marker (0 means null)
    fn read_pointer(&mut self) -> Result<u64>;

    /// Read `len` raw bytes without alignment
    fn read_bytes(&mut self, len: usize) -> Result<Bytes>;

    /// Read a union discriminant
    fn read_switch(&mut self, kind: ScalarKind) -> Result<Scalar> {
        self.read_data(kind)
    }

    /// Validate a wire-declared element count before anything is allocated.
    ///
    /// `unit` is the minimum wire size of one element; the count is rejected
    /// when even that many bytes cannot be left in the input.
    fn check_bounds(&self, count: u64, unit: usize) -> Result<usize> {
        let needed = count
            .checked_mul(unit.max(1) as u64)
            .ok_or(NdrError::IntegerOverflow)?;
        if needed > self.remaining() as u64 {
            return Err(NdrError::BufferOverflow {
                size: count,
                have: self.remaining(),
            });
        }
        let limit = self.context().max_elements;
        if count > limit as u64 {
            return Err(NdrError::AllocationLimitExceeded {
                requested: count,
                limit,
            });
        }
        Ok(count as usize)
    }
}

/// [`NdrRead`] implementation over an immutable byte buffer
#[derive(Debug, Clone)]
pub struct NdrReader {
    buf: Bytes,
    ctx: NdrContext,
    position: usize,
}

impl NdrReader {
    pub fn new(buf: impl Into<Bytes>, ctx: NdrContext) -> Self {
        Self {
            buf: buf.into(),
            ctx,
            position: 0,
        }
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(NdrError::BufferUnderflow {
                needed,
                have: self.buf.remaining(),
            });
        }
        Ok(())
    }
}

impl NdrRead for NdrReader {
    fn context(&self) -> &NdrContext {
        &self.ctx
    }

    fn position(&self) -> usize {
        self.position
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn read_align(&mut self, alignment: usize) -> Result<()> {
        let padding = NdrContext::align_padding(self.position, alignment);
        self.ensure(padding)?;
        self.buf.advance(padding);
        self.position += padding;
        Ok(())
    }

    fn read_data(&mut self, kind: ScalarKind) -> Result<Scalar> {
        let size = kind.size(self.ctx.ndr64);
        let padding = NdrContext::align_padding(self.position, size);
        self.ensure(padding + size)?;
        self.buf.advance(padding);
        let value = Scalar::get(kind, &self.ctx, &mut self.buf);
        self.position += padding + size;
        Ok(value)
    }

    fn read_size(&mut self) -> Result<u64> {
        let kind = if self.ctx.ndr64 {
            ScalarKind::U64
        } else {
            ScalarKind::U32
        };
        Ok(self.read_data(kind)?.as_i64() as u64)
    }

    fn read_pointer(&mut self) -> Result<u64> {
        self.read_size()
    }

    fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        let bytes = self.buf.split_to(len);
        self.position += len;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_data_skips_padding() {
        let data = vec![1u8, 0, 0, 0, 0x44, 0x33, 0x22, 0x11];
        let mut r = NdrReader::new(data, NdrContext::default());
        assert_eq!(r.read_data(ScalarKind::U8).unwrap(), Scalar::U8(1));
        assert_eq!(r.read_data(ScalarKind::U32).unwrap(), Scalar::U32(0x11223344));
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.position(), 8);
    }

    #[test]
    fn test_read_underflow() {
        let mut r = NdrReader::new(vec![1u8, 2], NdrContext::default());
        assert!(matches!(
            r.read_data(ScalarKind::U32),
            Err(NdrError::BufferUnderflow { needed: 4, have: 2 })
        ));
    }

    #[test]
    fn test_check_bounds_rejects_oversized_count() {
        let r = NdrReader::new(vec![0u8; 8], NdrContext::default());
        assert_eq!(r.check_bounds(8, 1).unwrap(), 8);
        assert!(matches!(
            r.check_bounds(3, 4),
            Err(NdrError::BufferOverflow { size: 3, have: 8 })
        ));
        assert!(matches!(
            r.check_bounds(u64::MAX, 2),
            Err(NdrError::IntegerOverflow)
        ));
    }

    #[test]
    fn test_check_bounds_allocation_limit() {
        let ctx = NdrContext::default().with_max_elements(4);
        let r = NdrReader::new(vec![0u8; 64], ctx);
        assert!(matches!(
            r.check_bounds(5, 1),
            Err(NdrError::AllocationLimitExceeded { requested: 5, limit: 4 })
        ));
    }
}
