//! Value decoder
//!
//! Mirrors the encoder. A non-null embedded pointer decodes to a
//! [`Value::Referent`] placeholder naming a slot; the referent is read
//! once the top-level value is complete and [`Decoder::decode_top`] swaps
//! every placeholder for the pointer it stands for.
//!
//! Every count read from the wire goes through
//! [`NdrRead::check_bounds`] before anything is allocated for it.

use std::collections::HashMap;
use std::sync::Arc;

use midl_ndr::{
    from_units, read_conformance, read_units, read_variance, split_multi, DeferredQueue,
    NdrError, NdrRead, PointerKind, ScalarKind,
};
use tracing::{debug, trace};

use crate::codec::zero::zero_value;
use crate::codec::Env;
use crate::error::{MidlError, Result};
use crate::ndr_layout::{self, NdrLayout};
use crate::registry::Registry;
use crate::scopes::{ScopeKind, Scopes};
use crate::types::{Dimension, Primitive};
use crate::value::{StructValue, UnionValue, Value};

/// A referent waiting to be read into `slot`
struct Pending {
    scopes: Scopes,
    slot: usize,
    /// Sibling values of the struct that owns the pointer, filled in once
    /// that struct has been read completely
    env: Option<Env>,
}

struct Shape {
    dims: Vec<Dimension>,
    actual: Vec<u64>,
}

/// Per-call decoder state
pub(crate) struct Decoder<'a, R: NdrRead + ?Sized> {
    registry: &'a Registry,
    r: &'a mut R,
    deferred: DeferredQueue<Pending>,
    slots: Vec<Option<Value>>,
    ndr64: bool,
}

impl<'a, R: NdrRead + ?Sized> Decoder<'a, R> {
    pub(crate) fn new(registry: &'a Registry, r: &'a mut R) -> Self {
        let ndr64 = r.context().ndr64;
        Self {
            registry,
            r,
            deferred: DeferredQueue::new(),
            slots: Vec::new(),
            ndr64,
        }
    }

    /// Decode a complete top-level value, referents included
    pub(crate) fn decode_top(&mut self, scopes: &Scopes) -> Result<Value> {
        let mut value = self.decode(scopes, &HashMap::new(), None, true)?;
        self.drain_deferred()?;
        self.resolve(&mut value)?;
        Ok(value)
    }

    fn drain_deferred(&mut self) -> Result<()> {
        for item in self.deferred.take() {
            let env = item.env.unwrap_or_default();
            trace!("reading deferred referent of {} into slot {}", item.scopes.name(), item.slot);

            let start = self.deferred.len();
            let value = self.decode(&item.scopes, &env, None, false)?;
            // referents found inside this one see the same siblings
            for pending in self.deferred.iter_mut().skip(start) {
                if pending.env.is_none() {
                    pending.env = Some(env.clone());
                }
            }

            if let Some(slot) = self.slots.get_mut(item.slot) {
                *slot = Some(value);
            }
            self.drain_deferred()?;
        }
        Ok(())
    }

    /// Replace every referent placeholder by its pointer
    fn resolve(&mut self, value: &mut Value) -> Result<()> {
        match value {
            Value::Referent(slot) => {
                let slot = *slot;
                let mut referent = self
                    .slots
                    .get_mut(slot)
                    .and_then(Option::take)
                    .ok_or(NdrError::InvalidPointer(slot as u64))?;
                self.resolve(&mut referent)?;
                *value = Value::pointer(referent);
            }
            Value::Pointer(Some(referent)) => self.resolve(referent)?,
            Value::Array(items) => {
                for item in items {
                    self.resolve(item)?;
                }
            }
            Value::Struct(sv) => {
                for (_, field) in &mut sv.fields {
                    self.resolve(field)?;
                }
            }
            Value::Union(uv) => self.resolve(&mut uv.value)?,
            _ => {}
        }
        Ok(())
    }

    fn decode(
        &mut self,
        scopes: &Scopes,
        env: &HashMap<String, i64>,
        hoisted: Option<&[u64]>,
        top: bool,
    ) -> Result<Value> {
        match scopes.kind() {
            ScopeKind::Void | ScopeKind::BindingHandle => Ok(Value::Void),
            ScopeKind::ContextHandle => {
                let attributes = self.r.read_data(ScalarKind::U32)?.as_i64() as u32;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&self.r.read_bytes(16)?);
                Ok(Value::ContextHandle { attributes, uuid })
            }
            ScopeKind::Primitive(p) => self.decode_primitive(scopes, p),
            ScopeKind::Enum => {
                let kind = if scopes.attrs().v1_enum {
                    ScalarKind::I32
                } else {
                    ScalarKind::U16
                };
                Ok(Value::Enum(self.r.read_data(kind)?.as_i64()))
            }
            ScopeKind::Struct => self.decode_struct(scopes, hoisted),
            ScopeKind::Union => self.decode_union(scopes, env),
            ScopeKind::Pointer => self.decode_pointer(scopes, env, top),
            ScopeKind::Array => self.decode_array(scopes, env, hoisted),
            ScopeKind::Pipe => self.decode_pipe(scopes, env),
        }
    }

    fn decode_primitive(&mut self, scopes: &Scopes, p: Primitive) -> Result<Value> {
        let scalar = self.r.read_data(p.scalar_kind())?;
        if scopes.is_bool() {
            Ok(Value::Bool(scalar.as_i64() != 0))
        } else {
            Ok(Value::from_scalar(scalar))
        }
    }

    fn decode_struct(&mut self, scopes: &Scopes, hoisted: Option<&[u64]>) -> Result<Value> {
        let ty = scopes.ty();
        let layout = NdrLayout::for_type(self.registry, ty, self.ndr64)?;
        let members = self.registry.member_scopes(ty)?;

        let sizes = if layout.is_conformant {
            match hoisted {
                Some(sizes) => Some(sizes.to_vec()),
                None => {
                    let count = ndr_layout::conformant_dims(self.registry, scopes)?;
                    Some(read_conformance(&mut *self.r, count)?)
                }
            }
        } else {
            None
        };

        self.r.read_align(layout.max_alignment())?;

        let start = self.deferred.len();
        let last = members.len().saturating_sub(1);
        let trailing = if layout.is_conformant_or_varying() {
            last.checked_sub(1)
        } else {
            None
        };

        let mut env = HashMap::new();
        let mut fields = Vec::with_capacity(members.len());
        for (i, field) in members.iter().enumerate() {
            let Some(info) = field.field() else { continue };
            if info.attrs.ignore {
                fields.push((info.name.clone(), zero_value(self.registry, field)?));
                continue;
            }

            let hoisted = if i == last { sizes.as_deref() } else { None };
            let value = self.decode(field, &env, hoisted, false)?;
            if let Some(v) = value.as_i64() {
                env.insert(info.name.clone(), v);
            }
            fields.push((info.name.clone(), value));

            if Some(i) == trailing
                && ndr_layout::alignment(self.registry, field, false, self.ndr64)?
                    != layout.alignment
            {
                self.r.read_align(layout.max_alignment())?;
            }
        }

        if let Some(pad) = scopes.attrs().pad {
            self.r.read_align(pad)?;
        }

        let env: Env = Arc::new(env);
        for pending in self.deferred.iter_mut().skip(start) {
            if pending.env.is_none() {
                pending.env = Some(env.clone());
            }
        }

        Ok(Value::Struct(StructValue { fields }))
    }

    fn decode_union(&mut self, scopes: &Scopes, env: &HashMap<String, i64>) -> Result<Value> {
        let ty = scopes.ty();
        let union = ty
            .as_union()
            .ok_or_else(|| MidlError::malformed(ty.display_name(), "not a union"))?;
        let members = self.registry.member_scopes(ty)?;

        if union.is_c_style() {
            let (Some(arm), Some(member)) = (union.arms.first(), members.first()) else {
                return Err(MidlError::malformed(ty.display_name(), "union has no arms"));
            };
            let value = self.decode(member, env, None, false)?;
            return Ok(Value::Union(UnionValue::new(arm.name(), value)));
        }

        let discriminant = match union.switch_type() {
            Some(switch_ty) => {
                let switch = self.registry.scopes(switch_ty)?;
                match switch.kind() {
                    ScopeKind::Primitive(p) => self.r.read_switch(p.scalar_kind())?.as_i64(),
                    _ => self
                        .decode(&switch, env, None, false)?
                        .as_i64()
                        .ok_or_else(|| {
                            MidlError::malformed(ty.display_name(), "non-integer switch")
                        })?,
                }
            }
            None => 0,
        };

        let idx = union
            .arms
            .iter()
            .position(|arm| arm.matches(discriminant))
            .or_else(|| union.arms.iter().position(|arm| arm.is_default))
            .ok_or_else(|| MidlError::InvalidDiscriminant {
                name: ty.display_name(),
                value: discriminant,
            })?;

        if union.is_encapsulated() {
            let layout = NdrLayout::for_type(self.registry, ty, self.ndr64)?;
            self.r.read_align(layout.max_alignment())?;
        }

        let value = self.decode(&members[idx], env, None, false)?;
        Ok(Value::Union(
            UnionValue::new(union.arms[idx].name(), value).with_discriminant(discriminant),
        ))
    }

    fn decode_pointer(
        &mut self,
        scopes: &Scopes,
        env: &HashMap<String, i64>,
        top: bool,
    ) -> Result<Value> {
        let next = scopes
            .next()
            .ok_or_else(|| MidlError::malformed(scopes.name(), "pointer without target"))?;
        let kind = scopes.pointer_kind();

        if top && kind == PointerKind::Ref {
            let referent = self.decode(&next, env, None, false)?;
            return Ok(Value::pointer(referent));
        }

        let id = self.r.read_pointer()?;
        if id == 0 {
            if kind == PointerKind::Ref {
                return Err(NdrError::InvalidPointer(0).into());
            }
            return Ok(Value::null());
        }

        let slot = self.slots.len();
        self.slots.push(None);
        trace!("deferred referent 0x{:x} of {} to slot {}", id, scopes.name(), slot);
        self.deferred.push(Pending {
            scopes: next,
            slot,
            env: None,
        });
        Ok(Value::Referent(slot))
    }

    fn decode_array(
        &mut self,
        scopes: &Scopes,
        env: &HashMap<String, i64>,
        hoisted: Option<&[u64]>,
    ) -> Result<Value> {
        let shape = self.read_headers(scopes, env, hoisted)?;
        let element = scopes
            .skip(shape.dims.len())
            .ok_or_else(|| MidlError::malformed(scopes.name(), "array without element"))?;
        self.decode_elements(scopes, env, &shape, 0, &element)
    }

    fn read_headers(
        &mut self,
        scopes: &Scopes,
        env: &HashMap<String, i64>,
        hoisted: Option<&[u64]>,
    ) -> Result<Shape> {
        let run = scopes.array_run();
        let mut dims = Vec::with_capacity(run);
        for d in 0..run {
            let dim = scopes
                .skip(d)
                .and_then(|s| s.dim().cloned())
                .ok_or_else(|| MidlError::malformed(scopes.name(), "array without dimension"))?;
            dims.push(dim);
        }

        let first = &dims[0];
        if first.no_size_limit {
            let count = match (&first.size, &first.length) {
                (Some(expr), _) | (None, Some(expr)) => expr.eval(env)?.max(0) as u64,
                (None, None) => {
                    let unit = scopes
                        .next()
                        .map_or(1, |element| ndr_layout::min_wire_size(&element, self.ndr64));
                    (self.r.remaining() / unit.max(1)) as u64
                }
            };
            return Ok(Shape {
                dims,
                actual: vec![count],
            });
        }

        let mut max = if first.is_conformant() {
            match hoisted {
                Some(sizes) if sizes.len() >= run => sizes[..run].to_vec(),
                _ => read_conformance(&mut *self.r, run)?,
            }
        } else {
            vec![first.fixed.unwrap_or(0)]
        };

        if self.r.context().opaque_size_hint {
            for (d, dim) in dims.iter().enumerate() {
                if max[d] != 0 || !dim.is_conformant() {
                    continue;
                }
                let Some(size) = &dim.size else { continue };
                if let Ok(hint) = size.eval(env) {
                    if hint > 0 {
                        debug!("{} reads a zero size, using {} = {}", scopes.name(), size, hint);
                        max[d] = hint as u64;
                    }
                }
            }
        }

        let actual = if dims.iter().any(Dimension::is_varying) {
            let mut actual = Vec::with_capacity(run);
            for &max_count in &max {
                // the offset is checked against the bound, then ignored
                let variance = read_variance(&mut *self.r, Some(max_count))?;
                actual.push(variance.actual_count);
            }
            actual
        } else {
            max
        };

        Ok(Shape { dims, actual })
    }

    fn decode_elements(
        &mut self,
        scopes: &Scopes,
        env: &HashMap<String, i64>,
        shape: &Shape,
        depth: usize,
        element: &Scopes,
    ) -> Result<Value> {
        let count = shape.actual[depth];
        let layer = scopes.skip(depth).unwrap_or_else(|| scopes.clone());

        if depth + 1 < shape.dims.len() {
            let n = self.r.check_bounds(count, 1)?;
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(self.decode_elements(scopes, env, shape, depth + 1, element)?);
            }
            return Ok(Value::Array(items));
        }

        if let Some(width) = layer.char_width() {
            let units = read_units(&mut *self.r, count, width)?;
            return Ok(if shape.dims[depth].multi_size {
                Value::StrList(split_multi(&units))
            } else {
                Value::Str(from_units(&units, width)?)
            });
        }

        match element.kind() {
            ScopeKind::Primitive(p) if p.is_byte() && !element.is_bool() => {
                let n = self.r.check_bounds(count, 1)?;
                Ok(Value::Bytes(self.r.read_bytes(n)?.to_vec()))
            }
            _ => {
                let unit = ndr_layout::min_wire_size(element, self.ndr64);
                let n = self.r.check_bounds(count, unit)?;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.decode(element, env, None, false)?);
                }
                Ok(Value::Array(items))
            }
        }
    }

    fn decode_pipe(&mut self, scopes: &Scopes, env: &HashMap<String, i64>) -> Result<Value> {
        let members = self.registry.member_scopes(scopes.ty())?;
        let element = members
            .first()
            .ok_or_else(|| MidlError::malformed(scopes.name(), "pipe without element"))?;
        let unit = ndr_layout::min_wire_size(element, self.ndr64);
        let limit = self.r.context().max_elements;

        let mut items = Vec::new();
        loop {
            let chunk = self.r.read_size()?;
            if chunk == 0 {
                break;
            }
            let total = (items.len() as u64)
                .checked_add(chunk)
                .ok_or(NdrError::IntegerOverflow)?;
            if total > limit as u64 {
                return Err(NdrError::AllocationLimitExceeded {
                    requested: total,
                    limit,
                }
                .into());
            }
            let n = self.r.check_bounds(chunk, unit)?;
            items.reserve(n);
            for _ in 0..n {
                items.push(self.decode(element, env, None, false)?);
            }
        }
        Ok(Value::Array(items))
    }
}
