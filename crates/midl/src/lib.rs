//! MIDL type layout and NDR marshaling engine
//!
//! This crate marshals dynamic values against MIDL type descriptions,
//! producing NDR bytes through the writer/reader contract of `midl_ndr`.
//!
//! # Architecture
//!
//! The engine is layered:
//! 1. Types: the description of a MIDL type graph ([`Type`], [`Field`], ...)
//! 2. Registry: named types frozen into a shareable [`Registry`]
//! 3. Scope chains: a field flattened into pointer, array and terminal layers
//! 4. Layout: alignment and conformance/variance of a scope chain
//! 5. Codec: value preparation, encoding and decoding ([`TypeCodec`])
//!
//! # Example
//!
//! ```
//! use midl::{Field, PointerKind, Registry, StructValue, Type, Value};
//! use midl_ndr::NdrContext;
//!
//! let blob = Type::structure(
//!     "BLOB",
//!     vec![
//!         Field::new("cbSize", Type::named("ULONG")),
//!         Field::new("pBlobData", Type::pointer(PointerKind::Unique, Type::named("BYTE")))
//!             .size_is(&["cbSize"])?,
//!     ],
//! );
//! let registry = Registry::builder().register_type(blob)?.build()?;
//! let codec = registry.codec("BLOB")?;
//!
//! let value = StructValue::new().with("pBlobData", Value::pointer(vec![1u8, 2, 3]));
//! let bytes = codec.to_bytes(&value.into(), NdrContext::default())?;
//! assert_eq!(&bytes[..4], &[3, 0, 0, 0]);
//! # Ok::<(), midl::MidlError>(())
//! ```

mod codec;
mod error;
pub mod expr;
pub mod ndr_layout;
mod registry;
mod scopes;
pub mod types;
mod value;

pub use codec::{zero_value, TypeCodec};
pub use error::{MidlError, Result, Span};
pub use expr::{Expr, Lookup, NoLookup};
pub use ndr_layout::NdrLayout;
pub use registry::{Registry, RegistryBuilder, INTERFACE_POINTER};
pub use scopes::{FieldInfo, Scope, ScopeKind, Scopes};
pub use types::{
    Dimension, EnumType, Field, FieldAttrs, Primitive, Range, StructType, Type, TypeAttrs, TypeKind,
    TypeRef, UnionArm, UnionSwitch, UnionType,
};
pub use value::{StructValue, UnionValue, Value};

pub use midl_ndr::{NdrContext, PointerKind};
