//! NDR array headers
//!
//! NDR arrays come in four shapes:
//!
//! - Fixed arrays: size known from the type, no header
//! - Conformant arrays: `max_count` written once, at the top of the
//!   outermost containing aggregate
//! - Varying arrays: `offset` and `actual_count` written at every occurrence
//! - Conformant varying arrays: both of the above
//!
//! Wire format of a conformant varying array of one dimension:
//! ```text
//! max_count: u32      # hoisted to the start of a conformant struct
//! offset: u32         # always 0 when written by this crate
//! actual_count: u32
//! elements[actual_count]
//! ```
//!
//! Under NDR64 every header is a u64.

use crate::{NdrError, NdrRead, NdrWrite, Result};

/// Transmitted window of a varying dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Variance {
    pub offset: u64,
    pub actual_count: u64,
}

impl Variance {
    pub fn new(actual_count: u64) -> Self {
        Self {
            offset: 0,
            actual_count,
        }
    }

    /// Number of element slots the window spans
    pub fn end(&self) -> Result<u64> {
        self.offset
            .checked_add(self.actual_count)
            .ok_or(NdrError::IntegerOverflow)
    }
}

/// Write the `max_count` of every conformant dimension, outermost first
pub fn write_conformance<W: NdrWrite + ?Sized>(w: &mut W, sizes: &[u64]) {
    for &size in sizes {
        w.write_size(size);
    }
}

/// Read `count` conformant dimension sizes
pub fn read_conformance<R: NdrRead + ?Sized>(r: &mut R, count: usize) -> Result<Vec<u64>> {
    let mut sizes = Vec::with_capacity(count);
    for _ in 0..count {
        sizes.push(r.read_size()?);
    }
    Ok(sizes)
}

/// Write the variance pair of one dimension
pub fn write_variance<W: NdrWrite + ?Sized>(w: &mut W, variance: Variance) {
    w.write_size(variance.offset);
    w.write_size(variance.actual_count);
}

/// Read the variance pair of one dimension, validating it against
/// `max_count` when the dimension is also conformant or fixed
pub fn read_variance<R: NdrRead + ?Sized>(r: &mut R, max_count: Option<u64>) -> Result<Variance> {
    let variance = Variance {
        offset: r.read_size()?,
        actual_count: r.read_size()?,
    };
    if let Some(max_count) = max_count {
        if variance.end()? > max_count {
            return Err(NdrError::ConformanceMismatch {
                max_count,
                actual_count: variance.actual_count,
            });
        }
    }
    Ok(variance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NdrContext, NdrReader, NdrWriter};

    #[test]
    fn test_conformant_varying_header() {
        let mut w = NdrWriter::default();
        write_conformance(&mut w, &[5]);
        write_variance(&mut w, Variance::new(3));
        assert_eq!(w.as_bytes(), &[5, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0]);

        let mut r = NdrReader::new(w.into_bytes(), NdrContext::default());
        let sizes = read_conformance(&mut r, 1).unwrap();
        assert_eq!(sizes, vec![5]);
        let variance = read_variance(&mut r, Some(sizes[0])).unwrap();
        assert_eq!(variance, Variance::new(3));
    }

    #[test]
    fn test_variance_exceeding_max_count() {
        let mut w = NdrWriter::default();
        write_variance(&mut w, Variance { offset: 2, actual_count: 4 });
        let mut r = NdrReader::new(w.into_bytes(), NdrContext::default());
        assert!(matches!(
            read_variance(&mut r, Some(5)),
            Err(NdrError::ConformanceMismatch { max_count: 5, actual_count: 4 })
        ));
    }

    #[test]
    fn test_ndr64_headers_are_eight_bytes() {
        let mut w = NdrWriter::new(NdrContext::new().with_ndr64(true));
        write_conformance(&mut w, &[1, 2]);
        assert_eq!(w.len(), 16);
    }
}
