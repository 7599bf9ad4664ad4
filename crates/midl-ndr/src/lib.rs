//! NDR (Network Data Representation) runtime library
//!
//! This crate provides the wire-level half of the NDR engine: the
//! Writer/Reader contract the type-driven codec in `midl` talks to, and the
//! small pieces of NDR that do not depend on a type description.
//!
//! # NDR Wire Format
//!
//! NDR is the standard encoding for DCE RPC data. Key characteristics:
//! - Primitives align to their natural size (1, 2, 4, or 8 bytes), relative
//!   to the start of the stub data
//! - Structures align to their largest member
//! - Conformant sizes are hoisted to the start of the outermost aggregate
//! - Embedded pointer referents are deferred until after the aggregate
//! - Strings are conformant varying arrays with a null terminator
//!
//! NDR64 widens size headers, pointer markers and `__int3264` to 8 bytes.

mod arrays;
mod context;
mod decode;
mod encode;
mod error;
mod pointers;
mod primitives;
mod strings;

pub use arrays::{read_conformance, read_variance, write_conformance, write_variance, Variance};
pub use context::NdrContext;
pub use decode::{NdrRead, NdrReader};
pub use encode::{NdrWrite, NdrWriter};
pub use error::{NdrError, Result, MAX_NDR_ARRAY_ELEMENTS};
pub use pointers::{DeferredQueue, PointerKind, ReferentIds, FIRST_REFERENT_ID};
pub use primitives::{Scalar, ScalarKind};
pub use strings::{
    bounded_units, from_units, multi_units, read_units, split_multi, to_units, wire_len,
    write_units, CharWidth, ZERO_STRING,
};

/// Re-export bytes for convenience
pub use bytes::{Buf, BufMut, Bytes, BytesMut};
