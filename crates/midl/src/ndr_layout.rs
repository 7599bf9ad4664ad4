//! NDR Layout Calculations
//!
//! Alignment and conformance/variance classification of scope chains.
//!
//! Alignment has two passes. The regular pass counts a pointer as a
//! referent-sized slot; the opaque pass, used when a structure is embedded
//! without following its pointers, counts it as 1. Padding decisions take
//! the larger of the two. Aggregate results are memoized in the registry.

use midl_ndr::NdrContext;

use crate::error::Result;
use crate::registry::Registry;
use crate::scopes::{ScopeKind, Scopes};
use crate::types::{TypeKind, TypeRef, UnionSwitch};

/// NDR layout information for a struct or union
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdrLayout {
    /// Alignment requirement in bytes, pointers as referent slots
    pub alignment: usize,
    /// Alignment requirement with pointers counted as 1
    pub opaque_alignment: usize,
    /// Trailing member carries a conformant array
    pub is_conformant: bool,
    /// Trailing member carries a varying array
    pub is_varying: bool,
}

impl NdrLayout {
    /// Calculate padding needed before this type at given offset
    pub fn padding_at(&self, offset: usize) -> usize {
        NdrContext::align_padding(offset, self.max_alignment())
    }

    /// Worst case over both passes
    pub fn max_alignment(&self) -> usize {
        self.alignment.max(self.opaque_alignment)
    }

    pub fn is_conformant_or_varying(&self) -> bool {
        self.is_conformant || self.is_varying
    }

    /// Layout of a struct or union node
    pub fn for_type(registry: &Registry, ty: &TypeRef, ndr64: bool) -> Result<Self> {
        registry.cached_layout(ty, ndr64, || match &ty.kind {
            TypeKind::Struct(_) => struct_layout(registry, ty, ndr64),
            TypeKind::Union(u) => {
                let members = registry.member_scopes(ty)?;
                let mut layout = Self {
                    alignment: 1,
                    opaque_alignment: 1,
                    is_conformant: false,
                    is_varying: false,
                };

                let arms: &[Scopes] = if u.is_c_style() {
                    &members[..members.len().min(1)]
                } else {
                    &members
                };
                let arm_alignment = |opaque| -> Result<usize> {
                    let mut max = 1;
                    for arm in arms {
                        max = max.max(alignment(registry, arm, opaque, ndr64)?);
                    }
                    Ok(max)
                };

                match &u.switch {
                    UnionSwitch::External { ty: switch } => {
                        let switch = registry.scopes(switch)?;
                        layout.alignment = alignment(registry, &switch, false, ndr64)?;
                        layout.opaque_alignment = layout.alignment;
                    }
                    UnionSwitch::Encapsulated { ty: switch, .. } => {
                        let switch = alignment(registry, &registry.scopes(switch)?, false, ndr64)?;
                        layout.alignment = switch.max(arm_alignment(false)?);
                        layout.opaque_alignment = switch.max(arm_alignment(true)?);
                    }
                    UnionSwitch::None => {
                        layout.alignment = arm_alignment(false)?;
                        layout.opaque_alignment = arm_alignment(true)?;
                    }
                }
                Ok(layout)
            }
            _ => Ok(Self {
                alignment: 1,
                opaque_alignment: 1,
                is_conformant: false,
                is_varying: false,
            }),
        })
    }
}

fn struct_layout(registry: &Registry, ty: &TypeRef, ndr64: bool) -> Result<NdrLayout> {
    let members = registry.member_scopes(ty)?;
    let mut layout = NdrLayout {
        alignment: 1,
        opaque_alignment: 1,
        is_conformant: false,
        is_varying: false,
    };
    for field in members.iter() {
        if field.field_attrs().is_some_and(|a| a.ignore) {
            continue;
        }
        layout.alignment = layout.alignment.max(alignment(registry, field, false, ndr64)?);
        layout.opaque_alignment = layout
            .opaque_alignment
            .max(alignment(registry, field, true, ndr64)?);
    }
    if let Some(last) = members.last() {
        layout.is_conformant = is_conformant(registry, last)?;
        layout.is_varying = is_varying(registry, last)?;
    }
    Ok(layout)
}

fn pointer_alignment(opaque: bool, ndr64: bool) -> usize {
    if opaque {
        1
    } else if ndr64 {
        8
    } else {
        4
    }
}

/// Alignment of the layer `scopes` points at
pub fn alignment(registry: &Registry, scopes: &Scopes, opaque: bool, ndr64: bool) -> Result<usize> {
    Ok(match scopes.kind() {
        ScopeKind::Void | ScopeKind::BindingHandle => 1,
        ScopeKind::Primitive(p) => p.size(ndr64),
        ScopeKind::Enum => {
            let v1 = scopes.attrs().v1_enum;
            if v1 {
                4
            } else {
                2
            }
        }
        ScopeKind::ContextHandle => 4,
        ScopeKind::Pointer => pointer_alignment(opaque, ndr64),
        ScopeKind::Array => {
            let element = match scopes.next() {
                Some(next) => alignment(registry, &next, opaque, ndr64)?,
                None => 1,
            };
            if scopes.dim().is_some_and(|d| d.is_varying()) {
                element.max(pointer_alignment(opaque, ndr64))
            } else {
                element
            }
        }
        ScopeKind::Struct | ScopeKind::Union => {
            let layout = NdrLayout::for_type(registry, scopes.ty(), ndr64)?;
            if opaque {
                layout.opaque_alignment
            } else {
                layout.alignment
            }
        }
        ScopeKind::Pipe => {
            let members = registry.member_scopes(scopes.ty())?;
            let mut element = 1;
            for m in members.iter() {
                element = element.max(alignment(registry, m, opaque, ndr64)?);
            }
            element.max(if ndr64 { 8 } else { 4 })
        }
    })
}

/// Worst-case alignment over both passes, used for padding
pub fn max_alignment(registry: &Registry, scopes: &Scopes, ndr64: bool) -> Result<usize> {
    Ok(alignment(registry, scopes, false, ndr64)?.max(alignment(registry, scopes, true, ndr64)?))
}

/// The layer is an array (or a struct ending in one) whose size is hoisted
pub fn is_conformant(registry: &Registry, scopes: &Scopes) -> Result<bool> {
    match scopes.kind() {
        ScopeKind::Array => {
            let mut cursor = Some(scopes.clone());
            while let Some(s) = cursor {
                match s.dim() {
                    Some(dim) if s.kind() == ScopeKind::Array => {
                        if dim.is_conformant() {
                            return Ok(true);
                        }
                    }
                    _ => break,
                }
                cursor = s.next();
            }
            Ok(false)
        }
        ScopeKind::Struct => Ok(NdrLayout::for_type(registry, scopes.ty(), false)?.is_conformant),
        _ => Ok(false),
    }
}

/// The layer is an array (or a struct ending in one) that carries variance
pub fn is_varying(registry: &Registry, scopes: &Scopes) -> Result<bool> {
    match scopes.kind() {
        ScopeKind::Array => {
            let mut cursor = Some(scopes.clone());
            while let Some(s) = cursor {
                match s.dim() {
                    Some(dim) if s.kind() == ScopeKind::Array => {
                        if dim.is_varying() {
                            return Ok(true);
                        }
                    }
                    _ => break,
                }
                cursor = s.next();
            }
            Ok(false)
        }
        ScopeKind::Struct => Ok(NdrLayout::for_type(registry, scopes.ty(), false)?.is_varying),
        _ => Ok(false),
    }
}

/// Number of `max_count` values a conformant struct hoists for its
/// trailing member
pub fn conformant_dims(registry: &Registry, scopes: &Scopes) -> Result<usize> {
    match scopes.kind() {
        ScopeKind::Array if scopes.dim().is_some_and(|d| d.is_conformant()) => {
            Ok(scopes.array_run())
        }
        ScopeKind::Struct => {
            let members = registry.member_scopes(scopes.ty())?;
            match members.last() {
                Some(last) => conformant_dims(registry, last),
                None => Ok(0),
            }
        }
        _ => Ok(0),
    }
}

/// Smallest number of bytes one element of this layer occupies on the wire
pub fn min_wire_size(scopes: &Scopes, ndr64: bool) -> usize {
    match scopes.kind() {
        ScopeKind::Primitive(p) => p.size(ndr64),
        ScopeKind::Enum => 2,
        ScopeKind::ContextHandle => 20,
        ScopeKind::Array => match (scopes.dim().and_then(|d| d.fixed), scopes.next()) {
            (Some(n), Some(next)) => {
                (n as usize).saturating_mul(min_wire_size(&next, ndr64)).max(1)
            }
            _ => 1,
        },
        _ => 1,
    }
}
