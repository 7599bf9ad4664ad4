//! NDR string payloads
//!
//! NDR strings are arrays of code units (bytes or UTF-16) that usually
//! travel as conformant varying arrays. This module handles the unit
//! conversion and the `[string]` terminator rules; the surrounding headers
//! are written by whoever owns the array dimension.
//!
//! Wire format of a `[string] wchar_t*`:
//! ```text
//! max_count: u32    # elements including null
//! offset: u32       # always 0
//! actual_count: u32 # elements including null
//! chars[actual_count]
//! ```

use crate::{NdrRead, NdrWrite, Result, Scalar, ScalarKind};

/// The canonical "zero string": a string consisting of a lone terminator.
/// It is written as exactly one zero unit, without a second terminator.
pub const ZERO_STRING: &str = "\0";

/// Width of one string code unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharWidth {
    /// `char`, `unsigned char`, `byte` strings
    Byte,
    /// `wchar_t` strings, UTF-16
    Wide,
}

impl CharWidth {
    pub fn unit_size(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Wide => 2,
        }
    }
}

/// Code units of `s` without any terminator
pub fn to_units(s: &str, width: CharWidth) -> Vec<u16> {
    match width {
        CharWidth::Byte => s.bytes().map(u16::from).collect(),
        CharWidth::Wide => s.encode_utf16().collect(),
    }
}

/// Number of units `s` occupies on the wire, terminator included
pub fn wire_len(s: &str, width: CharWidth, null_terminated: bool) -> usize {
    let len = match width {
        CharWidth::Byte => s.len(),
        CharWidth::Wide => s.encode_utf16().count(),
    };
    if null_terminated && s != ZERO_STRING {
        len + 1
    } else {
        len
    }
}

/// Units of `s` fitted to `bound`.
///
/// A null-terminated string keeps at most `bound - 1` units and then gets
/// its terminator; any other string is cut to `bound` units. A cut never
/// splits a UTF-8 sequence or a surrogate pair.
pub fn bounded_units(
    s: &str,
    width: CharWidth,
    bound: Option<u64>,
    null_terminated: bool,
) -> Vec<u16> {
    let mut units = to_units(s, width);
    let limit = match (bound, null_terminated) {
        (Some(bound), true) => Some(bound.saturating_sub(1) as usize),
        (Some(bound), false) => Some(bound as usize),
        (None, _) => None,
    };
    if let Some(limit) = limit {
        if units.len() > limit {
            tracing::warn!(len = units.len(), limit, "string truncated to declared bound");
            let keep = char_boundary(&units, limit, width);
            units.truncate(keep);
        }
    }
    if null_terminated && s != ZERO_STRING {
        units.push(0);
    }
    units
}

/// Largest cut point `<= limit` that does not fall inside a character
fn char_boundary(units: &[u16], limit: usize, width: CharWidth) -> usize {
    let mut keep = limit.min(units.len());
    match width {
        CharWidth::Byte => {
            // UTF-8 continuation bytes are 0b10xx_xxxx
            while keep > 0 && keep < units.len() && units[keep] & 0xC0 == 0x80 {
                keep -= 1;
            }
        }
        CharWidth::Wide => {
            if keep > 0 && (0xD800..=0xDBFF).contains(&units[keep - 1]) {
                keep -= 1;
            }
        }
    }
    keep
}

/// Units of a `multi_size` string list: each string followed by a
/// terminator, then a closing terminator
pub fn multi_units(strings: &[String]) -> Vec<u16> {
    let mut units = Vec::new();
    for s in strings {
        units.extend(s.encode_utf16());
        units.push(0);
    }
    units.push(0);
    units
}

/// Decode units into a string, dropping trailing terminators.
///
/// Wide strings decode lossily: an unpaired surrogate from the peer becomes
/// U+FFFD. Byte strings must be valid UTF-8.
pub fn from_units(units: &[u16], width: CharWidth) -> Result<String> {
    let end = units
        .iter()
        .rposition(|&u| u != 0)
        .map_or(0, |last| last + 1);
    let units = &units[..end];
    match width {
        CharWidth::Byte => {
            let bytes = units.iter().map(|&u| u as u8).collect();
            Ok(String::from_utf8(bytes)?)
        }
        CharWidth::Wide => Ok(String::from_utf16_lossy(units)),
    }
}

/// Split a `multi_size` unit buffer back into its strings
pub fn split_multi(units: &[u16]) -> Vec<String> {
    units
        .split(|&u| u == 0)
        .take_while(|part| !part.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

/// Write code units as array elements
pub fn write_units<W: NdrWrite + ?Sized>(w: &mut W, units: &[u16], width: CharWidth) {
    match width {
        CharWidth::Byte => {
            let bytes: Vec<u8> = units.iter().map(|&u| u as u8).collect();
            w.write_bytes(&bytes);
        }
        CharWidth::Wide => {
            for &unit in units {
                w.write_data(Scalar::U16(unit));
            }
        }
    }
}

/// Read `count` code units, checking the count against the input first
pub fn read_units<R: NdrRead + ?Sized>(
    r: &mut R,
    count: u64,
    width: CharWidth,
) -> Result<Vec<u16>> {
    let count = r.check_bounds(count, width.unit_size())?;
    match width {
        CharWidth::Byte => Ok(r.read_bytes(count)?.iter().map(|&b| u16::from(b)).collect()),
        CharWidth::Wide => {
            let mut units = Vec::with_capacity(count);
            for _ in 0..count {
                units.push(r.read_data(ScalarKind::U16)?.as_i64() as u16);
            }
            Ok(units)
        }
    }
}
