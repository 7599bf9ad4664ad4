//! Dynamic values
//!
//! Values handed to and produced by a [`TypeCodec`](crate::TypeCodec).
//! Encoding is lenient about integer widths (any integer variant marshals
//! as any integer type); decoding always yields the canonical variant for
//! the wire type:
//!
//! | Wire type                     | Decoded as            |
//! |-------------------------------|-----------------------|
//! | `boolean`, `BOOL`             | `Bool`                |
//! | integer primitives            | matching `I*`/`U*`    |
//! | `__int3264` / unsigned        | `I64` / `U64`         |
//! | enum                          | `Enum`                |
//! | `[string]` arrays             | `Str` (`StrList` for `multi_size`) |
//! | arrays of `byte`/`char`       | `Bytes`               |
//! | other arrays, pipes           | `Array`               |
//! | pointers                      | `Pointer`             |

use std::collections::HashMap;

use midl_ndr::Scalar;

/// A marshalable value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Nothing; also stands for "use the zero value"
    #[default]
    Void,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Enum(i64),
    Str(String),
    StrList(Vec<String>),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Struct(StructValue),
    Union(UnionValue),
    Pointer(Option<Box<Value>>),
    ContextHandle {
        attributes: u32,
        uuid: [u8; 16],
    },
    /// Referent slot placeholder used while pointers are being decoded
    #[doc(hidden)]
    Referent(usize),
}

impl Value {
    /// Non-null pointer to `value`
    pub fn pointer(value: impl Into<Value>) -> Self {
        Self::Pointer(Some(Box::new(value.into())))
    }

    pub fn null() -> Self {
        Self::Pointer(None)
    }

    /// Integer view; pointers read through to their referent
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(v) => Some(*v as i64),
            Self::I8(v) => Some(*v as i64),
            Self::U8(v) => Some(*v as i64),
            Self::I16(v) => Some(*v as i64),
            Self::U16(v) => Some(*v as i64),
            Self::I32(v) => Some(*v as i64),
            Self::U32(v) => Some(*v as i64),
            Self::I64(v) => Some(*v),
            Self::U64(v) => Some(*v as i64),
            Self::F32(v) => Some(*v as i64),
            Self::F64(v) => Some(*v as i64),
            Self::Enum(v) => Some(*v),
            Self::Pointer(Some(v)) => v.as_i64(),
            Self::Pointer(None) | Self::Void => Some(0),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            Self::U64(v) => Some(*v as f64),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Self::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_union(&self) -> Option<&UnionValue> {
        match self {
            Self::Union(u) => Some(u),
            _ => None,
        }
    }

    /// Referent of a non-null pointer
    pub fn referent(&self) -> Option<&Value> {
        match self {
            Self::Pointer(Some(v)) => Some(v),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Bool(_)
                | Self::I8(_)
                | Self::U8(_)
                | Self::I16(_)
                | Self::U16(_)
                | Self::I32(_)
                | Self::U32(_)
                | Self::I64(_)
                | Self::U64(_)
                | Self::Enum(_)
        )
    }

    /// Zero, false, empty or null
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Void | Self::Pointer(None) => true,
            Self::F32(v) => *v == 0.0,
            Self::F64(v) => *v == 0.0,
            Self::Str(s) => s.is_empty(),
            Self::StrList(l) => l.is_empty(),
            Self::Bytes(b) => b.is_empty(),
            Self::Array(a) => a.is_empty(),
            Self::Struct(s) => s.fields.iter().all(|(_, v)| v.is_zero()),
            Self::Union(_) | Self::Pointer(Some(_)) | Self::Referent(_) => false,
            Self::ContextHandle { attributes, uuid } => {
                *attributes == 0 && uuid.iter().all(|&b| b == 0)
            }
            other => other.as_i64() == Some(0),
        }
    }

    /// Element count of a sequence value
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Bytes(b) => Some(b.len()),
            Self::Array(a) => Some(a.len()),
            Self::Str(s) => Some(s.len()),
            Self::StrList(l) => Some(l.len()),
            _ => None,
        }
    }

    /// Same integer, in the variant of `self`
    pub(crate) fn with_integer(&self, v: i64) -> Value {
        match self {
            Self::Bool(_) => Self::Bool(v != 0),
            Self::I8(_) => Self::I8(v as i8),
            Self::U8(_) => Self::U8(v as u8),
            Self::I16(_) => Self::I16(v as i16),
            Self::U16(_) => Self::U16(v as u16),
            Self::I32(_) => Self::I32(v as i32),
            Self::U32(_) => Self::U32(v as u32),
            Self::U64(_) => Self::U64(v as u64),
            Self::Enum(_) => Self::Enum(v),
            Self::Pointer(Some(inner)) => Self::pointer(inner.with_integer(v)),
            _ => Self::I64(v),
        }
    }

    /// Canonical value of a decoded scalar
    pub(crate) fn from_scalar(scalar: Scalar) -> Value {
        match scalar {
            Scalar::U8(v) => Self::U8(v),
            Scalar::I8(v) => Self::I8(v),
            Scalar::U16(v) => Self::U16(v),
            Scalar::I16(v) => Self::I16(v),
            Scalar::U32(v) => Self::U32(v),
            Scalar::I32(v) => Self::I32(v),
            Scalar::U64(v) => Self::U64(v),
            Scalar::I64(v) => Self::I64(v),
            Scalar::F32(v) => Self::F32(v),
            Scalar::F64(v) => Self::F64(v),
            Scalar::Int3264(v) => Self::I64(v),
            Scalar::Uint3264(v) => Self::U64(v),
        }
    }

    /// Short name of the variant, for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::U8(_) => "u8",
            Self::I16(_) => "i16",
            Self::U16(_) => "u16",
            Self::I32(_) => "i32",
            Self::U32(_) => "u32",
            Self::I64(_) => "i64",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Enum(_) => "enum",
            Self::Str(_) => "string",
            Self::StrList(_) => "string list",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
            Self::Union(_) => "union",
            Self::Pointer(_) => "pointer",
            Self::ContextHandle { .. } => "context handle",
            Self::Referent(_) => "referent",
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
    Vec<u8> => Bytes,
    Vec<Value> => Array,
    Vec<String> => StrList,
    StructValue => Struct,
    UnionValue => Union,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

/// Field values of a structure, in declaration order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructValue {
    pub fields: Vec<(String, Value)>,
}

impl StructValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.iter_mut().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Replace a field, or append it
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.get_mut(&name) {
            Some(slot) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn take(&mut self, name: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    /// Integer view of every field that has one, for attribute expressions
    pub fn scalars(&self) -> HashMap<String, i64> {
        self.fields
            .iter()
            .filter_map(|(n, v)| v.as_i64().map(|i| (n.clone(), i)))
            .collect()
    }
}

/// Value of a union: the arm it holds and, optionally, the discriminant
#[derive(Debug, Clone, PartialEq)]
pub struct UnionValue {
    pub discriminant: Option<i64>,
    pub arm: String,
    pub value: Box<Value>,
}

impl UnionValue {
    pub fn new(arm: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            discriminant: None,
            arm: arm.into(),
            value: Box::new(value.into()),
        }
    }

    pub fn with_discriminant(mut self, discriminant: i64) -> Self {
        self.discriminant = Some(discriminant);
        self
    }
}
