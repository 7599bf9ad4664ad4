//! Type descriptions
//!
//! The engine walks an immutable graph of [`Type`] nodes. Nodes are shared
//! through [`TypeRef`] and never mutated once built; named references
//! ([`TypeKind::Named`]) are resolved through the [`Registry`](crate::Registry).

use std::sync::Arc;

use midl_ndr::{CharWidth, PointerKind, ScalarKind};

use crate::error::Result;
use crate::expr::Expr;

/// Shared handle to an immutable type node
pub type TypeRef = Arc<Type>;

/// Primitive (base) types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `boolean`, one byte
    Boolean,
    /// `char`
    Char,
    /// `unsigned char`
    UChar,
    /// `wchar_t`
    WChar,
    /// `small`
    Int8,
    /// `byte`
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    /// `__int3264`
    Int3264,
    /// `unsigned __int3264`
    Uint3264,
    Float32,
    Float64,
    /// `error_status_t`
    ErrorStatus,
}

impl Primitive {
    pub fn scalar_kind(self) -> ScalarKind {
        match self {
            Self::Boolean | Self::Char | Self::UChar | Self::Uint8 => ScalarKind::U8,
            Self::Int8 => ScalarKind::I8,
            Self::WChar | Self::Uint16 => ScalarKind::U16,
            Self::Int16 => ScalarKind::I16,
            Self::Int32 => ScalarKind::I32,
            Self::Uint32 | Self::ErrorStatus => ScalarKind::U32,
            Self::Int64 => ScalarKind::I64,
            Self::Uint64 => ScalarKind::U64,
            Self::Int3264 => ScalarKind::Int3264,
            Self::Uint3264 => ScalarKind::Uint3264,
            Self::Float32 => ScalarKind::F32,
            Self::Float64 => ScalarKind::F64,
        }
    }

    /// Wire size in bytes
    pub fn size(self, ndr64: bool) -> usize {
        self.scalar_kind().size(ndr64)
    }

    /// Unit width when the primitive is the element of a string
    pub fn char_width(self) -> Option<CharWidth> {
        match self {
            Self::Char | Self::UChar | Self::Int8 | Self::Uint8 => Some(CharWidth::Byte),
            Self::WChar | Self::Int16 | Self::Uint16 => Some(CharWidth::Wide),
            _ => None,
        }
    }

    /// Arrays of these decode to `Value::Bytes`
    pub fn is_byte(self) -> bool {
        matches!(self, Self::Char | Self::UChar | Self::Uint8)
    }

    pub fn is_signed(self) -> bool {
        self.scalar_kind().is_signed()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Char => "char",
            Self::UChar => "unsigned char",
            Self::WChar => "wchar_t",
            Self::Int8 => "small",
            Self::Uint8 => "byte",
            Self::Int16 => "short",
            Self::Uint16 => "unsigned short",
            Self::Int32 => "long",
            Self::Uint32 => "unsigned long",
            Self::Int64 => "hyper",
            Self::Uint64 => "unsigned hyper",
            Self::Int3264 => "__int3264",
            Self::Uint3264 => "unsigned __int3264",
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::ErrorStatus => "error_status_t",
        }
    }
}

/// `[range(min, max)]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub min: i64,
    pub max: i64,
}

impl Range {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Attributes attached to a type (typedef-level attributes)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeAttrs {
    /// Pointer kind of a typedef'd pointer
    pub pointer: PointerKind,
    /// `[string]`
    pub string: bool,
    /// An integer that carries a boolean (`BOOL`)
    pub boolean: bool,
    /// `[v1_enum]`: 32-bit enum on the wire
    pub v1_enum: bool,
    /// Strings are a `multi_size` list
    pub multi_size: bool,
    pub range: Option<Range>,
    /// Align to this boundary after the last field
    pub pad: Option<usize>,
}

impl TypeAttrs {
    /// Fold the attributes of an alias target into the attributes
    /// collected so far; attributes already set win.
    pub fn merge(&mut self, other: &TypeAttrs) {
        if self.pointer == PointerKind::None {
            self.pointer = other.pointer;
        }
        self.string |= other.string;
        self.boolean |= other.boolean;
        self.v1_enum |= other.v1_enum;
        self.multi_size |= other.multi_size;
        if self.range.is_none() {
            self.range = other.range;
        }
        if self.pad.is_none() {
            self.pad = other.pad;
        }
    }
}

/// A type node
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub name: Option<String>,
    pub kind: TypeKind,
    pub attrs: TypeAttrs,
}

/// Kinds of type nodes
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Void,
    Primitive(Primitive),
    Enum(EnumType),
    Struct(StructType),
    Union(UnionType),
    Pointer {
        kind: PointerKind,
        target: TypeRef,
    },
    /// `size` is the fixed element count; `None` declares `[]`
    Array {
        element: TypeRef,
        size: Option<u64>,
    },
    /// Reference to a registered type
    Named(String),
    /// Interface pointer target, marshaled as `MInterfacePointer`
    Interface(String),
    Pipe(TypeRef),
    /// `handle_t` (binding, not transmitted) or `[context_handle]`
    Handle {
        context: bool,
    },
}

/// Enumeration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumType {
    pub elements: Vec<(String, i64)>,
}

/// Structure
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructType {
    pub fields: Vec<Field>,
}

impl StructType {
    pub fn last_field(&self) -> Option<&Field> {
        self.fields.last()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// How a union gets its discriminant
#[derive(Debug, Clone, PartialEq)]
pub enum UnionSwitch {
    /// Discriminant travels inside the union, as its first member
    Encapsulated { name: String, ty: TypeRef },
    /// Discriminant comes from a `switch_is` sibling and is written
    /// in front of the arm
    External { ty: TypeRef },
    /// Plain C union: always marshaled as its first arm
    None,
}

/// One arm of a union
#[derive(Debug, Clone, PartialEq)]
pub struct UnionArm {
    pub labels: Vec<i64>,
    pub is_default: bool,
    /// A `void` field marks an empty arm
    pub field: Field,
}

impl UnionArm {
    pub fn case(labels: &[i64], field: Field) -> Self {
        Self {
            labels: labels.to_vec(),
            is_default: false,
            field,
        }
    }

    pub fn default(field: Field) -> Self {
        Self {
            labels: Vec::new(),
            is_default: true,
            field,
        }
    }

    pub fn name(&self) -> &str {
        &self.field.name
    }

    pub fn matches(&self, discriminant: i64) -> bool {
        self.labels.contains(&discriminant)
    }
}

/// Discriminated union
#[derive(Debug, Clone, PartialEq)]
pub struct UnionType {
    pub switch: UnionSwitch,
    pub arms: Vec<UnionArm>,
}

impl UnionType {
    pub fn encapsulated(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            switch: UnionSwitch::Encapsulated {
                name: name.into(),
                ty,
            },
            arms: Vec::new(),
        }
    }

    pub fn external(ty: TypeRef) -> Self {
        Self {
            switch: UnionSwitch::External { ty },
            arms: Vec::new(),
        }
    }

    pub fn c_style() -> Self {
        Self {
            switch: UnionSwitch::None,
            arms: Vec::new(),
        }
    }

    pub fn arm(mut self, arm: UnionArm) -> Self {
        self.arms.push(arm);
        self
    }

    pub fn is_encapsulated(&self) -> bool {
        matches!(self.switch, UnionSwitch::Encapsulated { .. })
    }

    pub fn is_c_style(&self) -> bool {
        matches!(self.switch, UnionSwitch::None)
    }

    pub fn switch_type(&self) -> Option<&TypeRef> {
        match &self.switch {
            UnionSwitch::Encapsulated { ty, .. } | UnionSwitch::External { ty } => Some(ty),
            UnionSwitch::None => None,
        }
    }

    /// Arm selected by a discriminant: a matching label, else the default arm
    pub fn select(&self, discriminant: i64) -> Option<&UnionArm> {
        self.arms
            .iter()
            .find(|arm| arm.matches(discriminant))
            .or_else(|| self.arms.iter().find(|arm| arm.is_default))
    }

    pub fn arm_by_name(&self, name: &str) -> Option<&UnionArm> {
        self.arms.iter().find(|arm| arm.name() == name)
    }
}

/// Attributes of a structure field or union arm
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldAttrs {
    /// Kind of the first pointer in the field's type
    pub pointer: PointerKind,
    pub size_is: Vec<Option<Expr>>,
    pub max_is: Vec<Option<Expr>>,
    pub min_is: Vec<Option<Expr>>,
    pub length_is: Vec<Option<Expr>>,
    pub first_is: Vec<Option<Expr>>,
    pub last_is: Vec<Option<Expr>>,
    pub switch_is: Option<Expr>,
    /// Layout only, never transmitted
    pub ignore: bool,
    /// Write a pointer to a primitive as null when any condition is false,
    /// or, with no conditions, when the value is zero
    pub default_null: Option<Vec<Expr>>,
    pub range: Option<Range>,
    pub string: bool,
    pub null_terminated: bool,
    pub multi_size: bool,
    /// Streamed array without any size information
    pub no_size_limit: bool,
    /// Assigned during payload preparation when the field is zero
    pub default_value: Option<Expr>,
}

/// A structure field or union arm
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeRef,
    pub attrs: FieldAttrs,
}

fn parse_dims(exprs: &[&str]) -> Result<Vec<Option<Expr>>> {
    exprs
        .iter()
        .map(|e| {
            let e = e.trim();
            if e.is_empty() {
                Ok(None)
            } else {
                Expr::parse(e).map(Some)
            }
        })
        .collect()
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            attrs: FieldAttrs::default(),
        }
    }

    pub fn with_attrs(mut self, attrs: FieldAttrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn pointer(mut self, kind: PointerKind) -> Self {
        self.attrs.pointer = kind;
        self
    }

    /// `[size_is(a, b)]`; an empty string skips a dimension
    pub fn size_is(mut self, exprs: &[&str]) -> Result<Self> {
        self.attrs.size_is = parse_dims(exprs)?;
        Ok(self)
    }

    pub fn max_is(mut self, exprs: &[&str]) -> Result<Self> {
        self.attrs.max_is = parse_dims(exprs)?;
        Ok(self)
    }

    pub fn min_is(mut self, exprs: &[&str]) -> Result<Self> {
        self.attrs.min_is = parse_dims(exprs)?;
        Ok(self)
    }

    pub fn length_is(mut self, exprs: &[&str]) -> Result<Self> {
        self.attrs.length_is = parse_dims(exprs)?;
        Ok(self)
    }

    pub fn first_is(mut self, exprs: &[&str]) -> Result<Self> {
        self.attrs.first_is = parse_dims(exprs)?;
        Ok(self)
    }

    pub fn last_is(mut self, exprs: &[&str]) -> Result<Self> {
        self.attrs.last_is = parse_dims(exprs)?;
        Ok(self)
    }

    pub fn switch_is(mut self, expr: &str) -> Result<Self> {
        self.attrs.switch_is = Some(Expr::parse(expr)?);
        Ok(self)
    }

    pub fn default_null(mut self, conditions: &[&str]) -> Result<Self> {
        self.attrs.default_null = Some(
            conditions
                .iter()
                .map(|c| Expr::parse(c))
                .collect::<Result<Vec<_>>>()?,
        );
        Ok(self)
    }

    pub fn default_value(mut self, expr: &str) -> Result<Self> {
        self.attrs.default_value = Some(Expr::parse(expr)?);
        Ok(self)
    }

    /// `[string]`: null-terminated
    pub fn string(mut self) -> Self {
        self.attrs.string = true;
        self.attrs.null_terminated = true;
        self
    }

    pub fn multi_size(mut self) -> Self {
        self.attrs.string = true;
        self.attrs.multi_size = true;
        self
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.attrs.range = Some(Range::new(min, max));
        self
    }

    pub fn ignore(mut self) -> Self {
        self.attrs.ignore = true;
        self
    }

    pub fn no_size_limit(mut self) -> Self {
        self.attrs.no_size_limit = true;
        self
    }

    /// Number of dimension slots the attributes describe
    pub fn dim_count(&self) -> usize {
        let a = &self.attrs;
        [
            a.size_is.len(),
            a.max_is.len(),
            a.min_is.len(),
            a.length_is.len(),
            a.first_is.len(),
            a.last_is.len(),
            a.no_size_limit as usize,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Array dimension active at one scope
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dimension {
    /// Position among the pointer/array layers of the field
    pub index: usize,
    /// Element count of a fixed array
    pub fixed: Option<u64>,
    /// `size_is`, or `max_is + 1`
    pub size: Option<Expr>,
    pub min_is: Option<Expr>,
    /// `length_is`, or the count implied by `first_is`/`last_is`
    pub length: Option<Expr>,
    pub first_is: Option<Expr>,
    pub is_string: bool,
    pub null_terminated: bool,
    pub multi_size: bool,
    pub no_size_limit: bool,
}

impl Dimension {
    pub(crate) fn from_field(attrs: &FieldAttrs, index: usize) -> Self {
        let at = |v: &Vec<Option<Expr>>| v.get(index).cloned().flatten();

        let size = at(&attrs.size_is).or_else(|| {
            at(&attrs.max_is).map(|max| {
                Expr::Binary(crate::expr::BinaryOp::Add, Box::new(max), Box::new(Expr::Int(1)))
            })
        });

        let first_is = at(&attrs.first_is);
        let length = at(&attrs.length_is).or_else(|| {
            at(&attrs.last_is).map(|last| {
                // last - first + 1
                let first = first_is.clone().unwrap_or(Expr::Int(0));
                Expr::Binary(
                    crate::expr::BinaryOp::Add,
                    Box::new(Expr::Binary(
                        crate::expr::BinaryOp::Sub,
                        Box::new(last),
                        Box::new(first),
                    )),
                    Box::new(Expr::Int(1)),
                )
            })
        });

        Self {
            index,
            fixed: None,
            size,
            min_is: at(&attrs.min_is),
            length,
            first_is,
            is_string: false,
            null_terminated: false,
            multi_size: false,
            no_size_limit: attrs.no_size_limit,
        }
    }

    /// Carries any size or length information of its own
    pub fn is_sized(&self) -> bool {
        self.size.is_some() || self.length.is_some() || self.no_size_limit
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some() && self.size.is_none()
    }

    /// Size written once, at the top of the outermost aggregate
    pub fn is_conformant(&self) -> bool {
        !self.is_fixed() && !self.no_size_limit
    }

    /// Offset and actual count written at every occurrence
    pub fn is_varying(&self) -> bool {
        !self.no_size_limit
            && ((self.is_string && self.null_terminated && !self.multi_size)
                || self.length.is_some())
    }
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            name: None,
            kind,
            attrs: TypeAttrs::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attrs(mut self, attrs: TypeAttrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn into_ref(self) -> TypeRef {
        Arc::new(self)
    }

    pub fn void() -> TypeRef {
        Self::new(TypeKind::Void).into_ref()
    }

    pub fn primitive(p: Primitive) -> TypeRef {
        Self::new(TypeKind::Primitive(p)).into_ref()
    }

    pub fn named(name: impl Into<String>) -> TypeRef {
        Self::new(TypeKind::Named(name.into())).into_ref()
    }

    pub fn pointer(kind: PointerKind, target: TypeRef) -> TypeRef {
        Self::new(TypeKind::Pointer { kind, target }).into_ref()
    }

    /// Fixed array `element[size]`
    pub fn array(element: TypeRef, size: u64) -> TypeRef {
        Self::new(TypeKind::Array {
            element,
            size: Some(size),
        })
        .into_ref()
    }

    /// Open array `element[]`
    pub fn conformant(element: TypeRef) -> TypeRef {
        Self::new(TypeKind::Array {
            element,
            size: None,
        })
        .into_ref()
    }

    pub fn structure(name: impl Into<String>, fields: Vec<Field>) -> TypeRef {
        Self::new(TypeKind::Struct(StructType { fields }))
            .with_name(name)
            .into_ref()
    }

    pub fn union(name: impl Into<String>, union: UnionType) -> TypeRef {
        Self::new(TypeKind::Union(union)).with_name(name).into_ref()
    }

    pub fn enumeration(name: impl Into<String>, elements: &[(&str, i64)]) -> TypeRef {
        Self::new(TypeKind::Enum(EnumType {
            elements: elements.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        }))
        .with_name(name)
        .into_ref()
    }

    pub fn pipe(element: TypeRef) -> TypeRef {
        Self::new(TypeKind::Pipe(element)).into_ref()
    }

    pub fn context_handle() -> TypeRef {
        Self::new(TypeKind::Handle { context: true }).into_ref()
    }

    pub fn binding_handle() -> TypeRef {
        Self::new(TypeKind::Handle { context: false }).into_ref()
    }

    pub fn interface(name: impl Into<String>) -> TypeRef {
        Self::new(TypeKind::Interface(name.into())).into_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for diagnostics
    pub fn display_name(&self) -> String {
        match (&self.name, &self.kind) {
            (Some(name), _) => name.clone(),
            (None, TypeKind::Primitive(p)) => p.as_str().to_string(),
            (None, TypeKind::Named(name)) => name.clone(),
            (None, TypeKind::Pointer { .. }) => "pointer".to_string(),
            (None, TypeKind::Array { .. }) => "array".to_string(),
            (None, kind) => format!("{:?}", std::mem::discriminant(kind)),
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match &self.kind {
            TypeKind::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_union(&self) -> Option<&UnionType> {
        match &self.kind {
            TypeKind::Union(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumType> {
        match &self.kind {
            TypeKind::Enum(e) => Some(e),
            _ => None,
        }
    }
}
