//! Type scope chains
//!
//! A scope chain flattens one field (or standalone type) into the ordered
//! list of layers the marshaler walks: pointer, array dimension, and finally
//! the terminal node (primitive, struct, union, ...).
//!
//! ```text
//! [size_is(Count)] LPWSTR *Names
//!     Pointer -> Array(Count) -> Pointer -> Array(string) -> wchar_t
//! [string] wchar_t Name[32]
//!     Array(32, string) -> wchar_t
//! IUnknown *Object
//!     Pointer -> Struct(MInterfacePointer)
//! ```
//!
//! Named references are resolved while the chain is built; the attributes
//! of every alias passed through are accumulated onto the scopes below it.
//! A pointer whose field carries size, length or string information at its
//! dimension gets a synthesized array scope right after it.

use std::sync::Arc;

use midl_ndr::{CharWidth, PointerKind};

use crate::error::{MidlError, Result};
use crate::ndr_layout;
use crate::registry::Registry;
use crate::types::{Dimension, Field, FieldAttrs, Primitive, Range, TypeAttrs, TypeKind, TypeRef};

/// Alias chains longer than this are treated as cycles
const MAX_ALIAS_DEPTH: usize = 64;

/// What a scope marshals as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Void,
    Primitive(Primitive),
    Enum,
    Struct,
    Union,
    Pointer,
    Array,
    Pipe,
    ContextHandle,
    BindingHandle,
}

/// One layer of a scope chain
#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    /// Node the scope was produced from; the pointer node for a
    /// synthesized array
    pub ty: TypeRef,
    /// Attributes accumulated from every alias above this layer
    pub attrs: TypeAttrs,
    /// First alias the layer was reached through
    pub alias: Option<String>,
    /// Resolved pointer kind, for pointer scopes
    pub pointer: PointerKind,
    /// Active dimension, for array scopes
    pub dim: Option<Dimension>,
}

/// Name and attributes of the field a chain was built for
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub attrs: FieldAttrs,
}

/// Cursor into a scope chain
#[derive(Debug, Clone)]
pub struct Scopes {
    chain: Arc<[Scope]>,
    pos: usize,
    field: Option<Arc<FieldInfo>>,
}

fn char_width_of(ty: &TypeRef) -> Option<CharWidth> {
    match &ty.kind {
        TypeKind::Primitive(p) => p.char_width(),
        _ => None,
    }
}

impl Scopes {
    pub(crate) fn build(registry: &Registry, ty: &TypeRef, field: Option<&Field>) -> Result<Self> {
        let default_attrs = FieldAttrs::default();
        let fattrs = field.map_or(&default_attrs, |f| &f.attrs);

        let mut attrs = TypeAttrs {
            range: fattrs.range,
            ..Default::default()
        };
        let mut string = fattrs.string;
        let mut null_terminated = fattrs.null_terminated;
        let mut multi_size = fattrs.multi_size;

        let mut chain = Vec::new();
        let mut current = ty.clone();
        let mut alias: Option<String> = None;
        let mut index = 0;
        let mut first_pointer = true;
        let mut depth = 0;

        loop {
            if let TypeKind::Named(name) = &current.kind {
                depth += 1;
                if depth > MAX_ALIAS_DEPTH {
                    return Err(MidlError::malformed(
                        name.as_str(),
                        "alias chain does not terminate",
                    ));
                }
                attrs.merge(&current.attrs);
                alias.get_or_insert_with(|| name.clone());
                current = registry
                    .lookup(name)
                    .cloned()
                    .ok_or_else(|| MidlError::undefined_type(name.as_str()))?;
                continue;
            }

            attrs.merge(&current.attrs);
            if current.attrs.string {
                string = true;
                null_terminated = true;
            }
            multi_size |= current.attrs.multi_size;
            if alias.is_none() {
                alias = current.name.clone();
            }

            let terminal = |kind: ScopeKind| Scope {
                kind,
                ty: current.clone(),
                attrs: attrs.clone(),
                alias: alias.clone(),
                pointer: PointerKind::None,
                dim: None,
            };

            match &current.kind {
                TypeKind::Named(_) => continue,
                TypeKind::Interface(_) => {
                    current = registry.interface_pointer()?;
                    continue;
                }
                TypeKind::Void => {
                    chain.push(terminal(ScopeKind::Void));
                    break;
                }
                TypeKind::Primitive(p) => {
                    chain.push(terminal(ScopeKind::Primitive(*p)));
                    break;
                }
                TypeKind::Enum(_) => {
                    chain.push(terminal(ScopeKind::Enum));
                    break;
                }
                TypeKind::Struct(_) => {
                    chain.push(terminal(ScopeKind::Struct));
                    break;
                }
                TypeKind::Union(_) => {
                    chain.push(terminal(ScopeKind::Union));
                    break;
                }
                TypeKind::Pipe(_) => {
                    chain.push(terminal(ScopeKind::Pipe));
                    break;
                }
                TypeKind::Handle { context } => {
                    chain.push(terminal(if *context {
                        ScopeKind::ContextHandle
                    } else {
                        ScopeKind::BindingHandle
                    }));
                    break;
                }
                TypeKind::Pointer { kind, target } => {
                    let mut kind = *kind;
                    if kind == PointerKind::None {
                        kind = attrs.pointer;
                    }
                    if first_pointer && fattrs.pointer != PointerKind::None {
                        kind = fattrs.pointer;
                    }
                    first_pointer = false;

                    chain.push(Scope {
                        pointer: kind.resolve(registry.pointer_default()),
                        ..terminal(ScopeKind::Pointer)
                    });

                    let mut dim = Dimension::from_field(fattrs, index);
                    dim.index = index;
                    index += 1;

                    let width = char_width_of(&registry.resolve(target)?);
                    let is_string = string && width.is_some();
                    if dim.is_sized() || is_string {
                        dim.is_string = is_string;
                        dim.null_terminated = is_string && null_terminated && !multi_size;
                        dim.multi_size = is_string && multi_size;
                        chain.push(Scope {
                            dim: Some(dim),
                            ..terminal(ScopeKind::Array)
                        });
                    }

                    attrs.pointer = PointerKind::None;
                    alias = None;
                    current = target.clone();
                }
                TypeKind::Array { element, size } => {
                    let mut dim = Dimension::from_field(fattrs, index);
                    dim.index = index;
                    dim.fixed = *size;
                    index += 1;

                    let width = char_width_of(&registry.resolve(element)?);
                    let is_string = string && width.is_some();
                    dim.is_string = is_string;
                    dim.null_terminated = is_string && null_terminated && !multi_size;
                    dim.multi_size = is_string && multi_size;
                    chain.push(Scope {
                        dim: Some(dim),
                        ..terminal(ScopeKind::Array)
                    });

                    alias = None;
                    current = element.clone();
                }
            }
        }

        if chain.is_empty() {
            return Err(MidlError::malformed(ty.display_name(), "empty scope chain"));
        }

        Ok(Self {
            chain: chain.into(),
            pos: 0,
            field: field.map(|f| {
                Arc::new(FieldInfo {
                    name: f.name.clone(),
                    attrs: f.attrs.clone(),
                })
            }),
        })
    }

    /// Chain of a standalone type
    pub fn for_type(registry: &Registry, ty: &TypeRef) -> Result<Self> {
        Self::build(registry, ty, None)
    }

    /// Chain of a field, with its pointer and dimension attributes applied
    pub fn for_field(registry: &Registry, field: &Field) -> Result<Self> {
        Self::build(registry, &field.ty, Some(field))
    }

    /// Worst-case alignment of this layer
    pub fn alignment(&self, registry: &Registry, ndr64: bool) -> Result<usize> {
        ndr_layout::max_alignment(registry, self, ndr64)
    }

    pub fn is_conformant(&self, registry: &Registry) -> Result<bool> {
        ndr_layout::is_conformant(registry, self)
    }

    pub fn is_varying(&self, registry: &Registry) -> Result<bool> {
        ndr_layout::is_varying(registry, self)
    }

    pub fn scope(&self) -> &Scope {
        &self.chain[self.pos]
    }

    pub fn kind(&self) -> ScopeKind {
        self.scope().kind
    }

    pub fn ty(&self) -> &TypeRef {
        &self.scope().ty
    }

    pub fn attrs(&self) -> &TypeAttrs {
        &self.scope().attrs
    }

    pub fn dim(&self) -> Option<&Dimension> {
        self.scope().dim.as_ref()
    }

    pub fn alias(&self) -> Option<&str> {
        self.scope().alias.as_deref()
    }

    pub fn pointer_kind(&self) -> PointerKind {
        self.scope().pointer
    }

    /// The layer below this one, `None` at the terminal scope
    pub fn next(&self) -> Option<Scopes> {
        if self.pos + 1 < self.chain.len() {
            Some(Self {
                chain: self.chain.clone(),
                pos: self.pos + 1,
                field: self.field.clone(),
            })
        } else {
            None
        }
    }

    /// Layers left, this one included
    pub fn remaining(&self) -> usize {
        self.chain.len() - self.pos
    }

    pub fn is_first(&self) -> bool {
        self.pos == 0
    }

    pub fn field(&self) -> Option<&FieldInfo> {
        self.field.as_deref()
    }

    pub fn field_attrs(&self) -> Option<&FieldAttrs> {
        self.field.as_deref().map(|f| &f.attrs)
    }

    /// Field name, or the alias, for diagnostics
    pub fn name(&self) -> String {
        match (&self.field, self.alias()) {
            (Some(f), _) => f.name.clone(),
            (None, Some(alias)) => alias.to_string(),
            (None, None) => self.ty().display_name(),
        }
    }

    /// A primitive carrying a boolean: `boolean`, or an integer typedef
    /// marked as boolean
    pub fn is_bool(&self) -> bool {
        matches!(self.kind(), ScopeKind::Primitive(Primitive::Boolean)) || self.attrs().boolean
    }

    pub fn range(&self) -> Option<Range> {
        self.attrs().range
    }

    /// Unit width of a string array scope
    pub fn char_width(&self) -> Option<CharWidth> {
        if !self.dim().is_some_and(|d| d.is_string) {
            return None;
        }
        match self.next()?.kind() {
            ScopeKind::Primitive(p) => p.char_width(),
            _ => None,
        }
    }

    /// Number of array scopes whose headers travel together, starting here.
    ///
    /// Consecutive conformant dimensions share one conformance block; any
    /// other array scope stands alone.
    pub fn array_run(&self) -> usize {
        let mut run = 0;
        let mut cursor = Some(self.clone());
        while let Some(scopes) = cursor {
            match scopes.dim() {
                Some(dim) if scopes.kind() == ScopeKind::Array => {
                    if !dim.is_conformant() {
                        return run.max(1);
                    }
                    run += 1;
                }
                _ => break,
            }
            cursor = scopes.next();
        }
        run
    }

    /// Advance `n` layers
    pub fn skip(&self, n: usize) -> Option<Scopes> {
        let pos = self.pos + n;
        if pos < self.chain.len() {
            Some(Self {
                chain: self.chain.clone(),
                pos,
                field: self.field.clone(),
            })
        } else {
            None
        }
    }
}
