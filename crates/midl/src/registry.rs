//! Type registry
//!
//! Named types are registered once through a [`RegistryBuilder`] and frozen
//! into an immutable [`Registry`]. The registry resolves
//! [`TypeKind::Named`] references and memoizes layout results, so a single
//! `Arc<Registry>` can serve any number of concurrent calls.
//!
//! Memoization is keyed by node address and limited to the nodes reachable
//! from registered types, which the registry keeps alive. Anonymous types
//! handed to [`Registry::codec_for`] are laid out on every use instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use midl_ndr::PointerKind;
use parking_lot::RwLock;

use crate::codec::TypeCodec;
use crate::error::{MidlError, Result};
use crate::expr::Expr;
use crate::ndr_layout::NdrLayout;
use crate::scopes::Scopes;
use crate::types::{Field, Primitive, Type, TypeAttrs, TypeKind, TypeRef};

/// Name of the builtin structure interface pointers marshal as
pub const INTERFACE_POINTER: &str = "MInterfacePointer";

/// Alias chains longer than this are treated as cycles
const MAX_ALIAS_DEPTH: usize = 64;

/// Immutable set of named types
#[derive(Debug)]
pub struct Registry {
    types: HashMap<String, TypeRef>,
    pointer_default: PointerKind,
    /// Addresses of every node reachable from `types`
    nodes: HashSet<usize>,
    layouts: RwLock<HashMap<(usize, bool), NdrLayout>>,
    members: RwLock<HashMap<usize, Arc<[Scopes]>>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn lookup(&self, name: &str) -> Option<&TypeRef> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Interface `pointer_default`
    pub fn pointer_default(&self) -> PointerKind {
        self.pointer_default
    }

    /// Follow named references down to a concrete node
    pub fn resolve(&self, ty: &TypeRef) -> Result<TypeRef> {
        let mut current = ty.clone();
        for _ in 0..MAX_ALIAS_DEPTH {
            match &current.kind {
                TypeKind::Named(name) => {
                    current = self
                        .lookup(name)
                        .cloned()
                        .ok_or_else(|| MidlError::undefined_type(name.as_str()))?;
                }
                _ => return Ok(current),
            }
        }
        Err(MidlError::malformed(
            ty.display_name(),
            "alias chain does not terminate",
        ))
    }

    pub(crate) fn interface_pointer(&self) -> Result<TypeRef> {
        self.lookup(INTERFACE_POINTER)
            .cloned()
            .ok_or_else(|| MidlError::undefined_type(INTERFACE_POINTER))
    }

    /// Scope chain of a standalone type
    pub fn scopes(&self, ty: &TypeRef) -> Result<Scopes> {
        Scopes::build(self, ty, None)
    }

    /// Scope chains of the members of an aggregate: struct fields, union
    /// arms, or the element of a pipe
    pub fn member_scopes(&self, ty: &TypeRef) -> Result<Arc<[Scopes]>> {
        let key = Arc::as_ptr(ty) as usize;
        if let Some(members) = self.members.read().get(&key) {
            return Ok(members.clone());
        }

        let members: Arc<[Scopes]> = match &ty.kind {
            TypeKind::Struct(s) => s
                .fields
                .iter()
                .map(|f| Scopes::build(self, &f.ty, Some(f)))
                .collect::<Result<Vec<_>>>()?
                .into(),
            TypeKind::Union(u) => u
                .arms
                .iter()
                .map(|arm| Scopes::build(self, &arm.field.ty, Some(&arm.field)))
                .collect::<Result<Vec<_>>>()?
                .into(),
            TypeKind::Pipe(element) => vec![Scopes::build(self, element, None)?].into(),
            _ => {
                return Err(MidlError::malformed(
                    ty.display_name(),
                    "type has no members",
                ))
            }
        };

        if self.nodes.contains(&key) {
            self.members.write().insert(key, members.clone());
        }
        Ok(members)
    }

    pub(crate) fn cached_layout(
        &self,
        ty: &TypeRef,
        ndr64: bool,
        compute: impl FnOnce() -> Result<NdrLayout>,
    ) -> Result<NdrLayout> {
        let key = (Arc::as_ptr(ty) as usize, ndr64);
        if let Some(layout) = self.layouts.read().get(&key) {
            return Ok(*layout);
        }
        let layout = compute()?;
        if self.nodes.contains(&key.0) {
            self.layouts.write().insert(key, layout);
        }
        Ok(layout)
    }

    /// Codec for a registered type
    pub fn codec(self: &Arc<Self>, name: &str) -> Result<TypeCodec> {
        let ty = self
            .lookup(name)
            .cloned()
            .ok_or_else(|| MidlError::undefined_type(name))?;
        TypeCodec::new(self.clone(), ty)
    }

    /// Codec for an anonymous type. Nothing about `ty` is memoized, so
    /// build the codec once and reuse it.
    pub fn codec_for(self: &Arc<Self>, ty: TypeRef) -> Result<TypeCodec> {
        TypeCodec::new(self.clone(), ty)
    }

    /// Check every registered type, returning the addresses of all nodes
    /// walked
    fn validate(&self) -> Result<HashSet<usize>> {
        let mut seen = HashSet::new();
        for ty in self.types.values() {
            self.validate_node(ty, &mut seen)?;
        }
        Ok(seen)
    }

    fn validate_node(&self, ty: &TypeRef, seen: &mut HashSet<usize>) -> Result<()> {
        if !seen.insert(Arc::as_ptr(ty) as usize) {
            return Ok(());
        }
        match &ty.kind {
            TypeKind::Named(_) => {
                self.resolve(ty)?;
            }
            TypeKind::Pointer { target, .. } => self.validate_node(target, seen)?,
            TypeKind::Array { element, .. } | TypeKind::Pipe(element) => {
                self.validate_node(element, seen)?
            }
            TypeKind::Struct(s) => {
                if s.fields.is_empty() {
                    return Err(MidlError::malformed(ty.display_name(), "struct has no fields"));
                }
                for f in &s.fields {
                    self.validate_node(&f.ty, seen)?;
                }
            }
            TypeKind::Union(u) => {
                if let Some(switch) = u.switch_type() {
                    self.validate_node(switch, seen)?;
                }
                for arm in &u.arms {
                    self.validate_node(&arm.field.ty, seen)?;
                }
            }
            TypeKind::Interface(_) => {
                self.interface_pointer()?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Collects named types before freezing them into a [`Registry`]
#[derive(Debug)]
pub struct RegistryBuilder {
    types: HashMap<String, TypeRef>,
    builtins: HashSet<String>,
    pointer_default: PointerKind,
}

impl RegistryBuilder {
    /// Builder preloaded with the base types and common Windows typedefs
    pub fn new() -> Self {
        let mut builder = Self {
            types: HashMap::new(),
            builtins: HashSet::new(),
            pointer_default: PointerKind::Unique,
        };

        let builtins = [
            ("boolean", Primitive::Boolean),
            ("byte", Primitive::Uint8),
            ("char", Primitive::Char),
            ("wchar_t", Primitive::WChar),
            ("small", Primitive::Int8),
            ("short", Primitive::Int16),
            ("long", Primitive::Int32),
            ("hyper", Primitive::Int64),
            ("int", Primitive::Int32),
            ("__int32", Primitive::Int32),
            ("__int64", Primitive::Int64),
            ("__int3264", Primitive::Int3264),
            ("float", Primitive::Float32),
            ("double", Primitive::Float64),
            ("error_status_t", Primitive::ErrorStatus),
            ("BYTE", Primitive::Uint8),
            ("UCHAR", Primitive::UChar),
            ("CHAR", Primitive::Char),
            ("WCHAR", Primitive::WChar),
            ("SHORT", Primitive::Int16),
            ("USHORT", Primitive::Uint16),
            ("WORD", Primitive::Uint16),
            ("LONG", Primitive::Int32),
            ("ULONG", Primitive::Uint32),
            ("DWORD", Primitive::Uint32),
            ("INT", Primitive::Int32),
            ("UINT", Primitive::Uint32),
            ("HRESULT", Primitive::Int32),
            ("NTSTATUS", Primitive::Int32),
            ("LONGLONG", Primitive::Int64),
            ("ULONGLONG", Primitive::Uint64),
            ("DWORD64", Primitive::Uint64),
            ("QWORD", Primitive::Uint64),
            ("LONG_PTR", Primitive::Int3264),
            ("ULONG_PTR", Primitive::Uint3264),
            ("SIZE_T", Primitive::Uint3264),
            ("FLOAT", Primitive::Float32),
            ("DOUBLE", Primitive::Float64),
        ];
        for (name, prim) in builtins {
            builder.insert_builtin(name, Type::new(TypeKind::Primitive(prim)));
        }

        let boolean = TypeAttrs {
            boolean: true,
            ..Default::default()
        };
        builder.insert_builtin(
            "BOOL",
            Type::new(TypeKind::Primitive(Primitive::Int32)).with_attrs(boolean.clone()),
        );
        builder.insert_builtin(
            "BOOLEAN",
            Type::new(TypeKind::Primitive(Primitive::Uint8)).with_attrs(boolean),
        );
        builder.insert_builtin("handle_t", Type::new(TypeKind::Handle { context: false }));

        let string = TypeAttrs {
            string: true,
            pointer: PointerKind::Unique,
            ..Default::default()
        };
        builder.insert_builtin(
            "LPWSTR",
            Type::new(TypeKind::Pointer {
                kind: PointerKind::Unique,
                target: Type::primitive(Primitive::WChar),
            })
            .with_attrs(string.clone()),
        );
        builder.insert_builtin(
            "LPSTR",
            Type::new(TypeKind::Pointer {
                kind: PointerKind::Unique,
                target: Type::primitive(Primitive::Char),
            })
            .with_attrs(string),
        );

        builder.insert_builtin(
            "GUID",
            Type::new(TypeKind::Struct(crate::types::StructType {
                fields: vec![
                    Field::new("Data1", Type::primitive(Primitive::Uint32)),
                    Field::new("Data2", Type::primitive(Primitive::Uint16)),
                    Field::new("Data3", Type::primitive(Primitive::Uint16)),
                    Field::new("Data4", Type::array(Type::primitive(Primitive::Uint8), 8)),
                ],
            })),
        );

        // typedef struct { unsigned long ulCntData; [size_is(ulCntData)] byte abData[]; }
        let mut data = Field::new("abData", Type::conformant(Type::primitive(Primitive::Uint8)));
        data.attrs.size_is = vec![Some(Expr::ident("ulCntData"))];
        builder.insert_builtin(
            INTERFACE_POINTER,
            Type::new(TypeKind::Struct(crate::types::StructType {
                fields: vec![
                    Field::new("ulCntData", Type::primitive(Primitive::Uint32)),
                    data,
                ],
            })),
        );

        builder
    }

    fn insert_builtin(&mut self, name: &str, ty: Type) {
        self.types
            .insert(name.to_string(), ty.with_name(name).into_ref());
        self.builtins.insert(name.to_string());
    }

    /// Interface `pointer_default` for pointers without an attribute
    pub fn pointer_default(mut self, kind: PointerKind) -> Self {
        self.pointer_default = kind;
        self
    }

    /// Register `ty` under `name`.
    ///
    /// Builtins may be redefined once; any other duplicate is an error.
    pub fn register(mut self, name: impl Into<String>, ty: TypeRef) -> Result<Self> {
        let name = name.into();
        if self.types.contains_key(&name) && !self.builtins.remove(&name) {
            return Err(MidlError::duplicate(name));
        }
        tracing::trace!(name = %name, "registered type");
        self.types.insert(name, ty);
        Ok(self)
    }

    /// Register a type under its own name
    pub fn register_type(self, ty: TypeRef) -> Result<Self> {
        let name = ty
            .name()
            .map(str::to_string)
            .ok_or_else(|| MidlError::malformed("<anonymous>", "cannot register an unnamed type"))?;
        self.register(name, ty)
    }

    /// Freeze the registry, checking that every named reference resolves
    pub fn build(self) -> Result<Arc<Registry>> {
        let mut registry = Registry {
            types: self.types,
            pointer_default: self.pointer_default,
            nodes: HashSet::new(),
            layouts: RwLock::new(HashMap::new()),
            members: RwLock::new(HashMap::new()),
        };
        registry.nodes = registry.validate()?;
        tracing::debug!(types = registry.types.len(), "type registry built");
        Ok(Arc::new(registry))
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_aliases_resolve() {
        let registry = RegistryBuilder::new().build().unwrap();
        let dword = registry.resolve(&Type::named("DWORD")).unwrap();
        assert_eq!(dword.kind, TypeKind::Primitive(Primitive::Uint32));
        assert!(registry.lookup("BOOL").unwrap().attrs.boolean);
    }

    #[test]
    fn test_duplicate_definition() {
        let point = Type::structure(
            "POINT",
            vec![
                Field::new("x", Type::primitive(Primitive::Int32)),
                Field::new("y", Type::primitive(Primitive::Int32)),
            ],
        );
        let result = RegistryBuilder::new()
            .register_type(point.clone())
            .unwrap()
            .register_type(point);
        assert!(matches!(result, Err(MidlError::DuplicateDefinition { .. })));
    }

    #[test]
    fn test_undefined_reference_rejected_at_build() {
        let s = Type::structure("S", vec![Field::new("a", Type::named("MISSING"))]);
        let result = RegistryBuilder::new().register_type(s).unwrap().build();
        assert!(matches!(result, Err(MidlError::UndefinedType { name }) if name == "MISSING"));
    }

    #[test]
    fn test_alias_cycle_detected() {
        let result = RegistryBuilder::new()
            .register("A", Type::named("B"))
            .unwrap()
            .register("B", Type::named("A"))
            .unwrap()
            .build();
        assert!(matches!(result, Err(MidlError::MalformedType { .. })));
    }

    #[test]
    fn test_member_scopes_cached() {
        let registry = RegistryBuilder::new().build().unwrap();
        let guid = registry.lookup("GUID").unwrap().clone();
        let a = registry.member_scopes(&guid).unwrap();
        let b = registry.member_scopes(&guid).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_anonymous_types_not_memoized() {
        let registry = RegistryBuilder::new().build().unwrap();
        let cached = registry.members.read().len();

        for _ in 0..16 {
            let pair = Type::structure(
                "PAIR",
                vec![
                    Field::new("a", Type::named("DWORD")),
                    Field::new("b", Type::named("WORD")),
                ],
            );
            let codec = registry.codec_for(pair).unwrap();
            assert_eq!(codec.alignment(false).unwrap(), 4);
            registry.member_scopes(codec.ty()).unwrap();
        }

        assert_eq!(registry.members.read().len(), cached);
        assert!(registry.layouts.read().is_empty());
    }
}
