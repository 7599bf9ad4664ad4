//! Value encoder
//!
//! Walks a scope chain and a prepared value together, writing through an
//! [`NdrWrite`]. Embedded pointer referents are queued and written by
//! [`Encoder::flush_deferred`] once the enclosing top-level value is done.

use std::collections::HashMap;
use std::sync::Arc;

use midl_ndr::{
    bounded_units, multi_units, to_units, write_conformance, write_units, write_variance,
    DeferredQueue, NdrWrite, PointerKind, Scalar, Variance,
};
use tracing::{trace, warn};

use crate::codec::prepare::data_len;
use crate::codec::zero::zero_value;
use crate::codec::{Env, VOID};
use crate::error::{MidlError, Result};
use crate::expr::Expr;
use crate::ndr_layout::{self, NdrLayout};
use crate::registry::Registry;
use crate::scopes::{ScopeKind, Scopes};
use crate::types::{Dimension, Primitive};
use crate::value::{StructValue, UnionValue, Value};

/// A pointer referent waiting to be written
struct Deferred {
    scopes: Scopes,
    value: Value,
    env: Env,
}

/// Header counts of one array run, outermost dimension first
struct Shape {
    dims: Vec<Dimension>,
    max: Vec<u64>,
    actual: Vec<u64>,
}

/// Per-call encoder state
pub(crate) struct Encoder<'a, W: NdrWrite + ?Sized> {
    registry: &'a Registry,
    w: &'a mut W,
    deferred: DeferredQueue<Deferred>,
    ndr64: bool,
}

// negative sizes collapse to an empty dimension
fn eval_count(expr: &Expr, env: &HashMap<String, i64>) -> Result<u64> {
    Ok(expr.eval(env)?.max(0) as u64)
}

impl<'a, W: NdrWrite + ?Sized> Encoder<'a, W> {
    pub(crate) fn new(registry: &'a Registry, w: &'a mut W) -> Self {
        let ndr64 = w.context().ndr64;
        Self {
            registry,
            w,
            deferred: DeferredQueue::new(),
            ndr64,
        }
    }

    /// Encode the root of a marshal call
    pub(crate) fn encode_top(&mut self, scopes: &Scopes, value: &Value) -> Result<()> {
        self.encode(scopes, value, &Env::default(), None, true)
    }

    /// Write every queued referent, each followed by its own referents
    pub(crate) fn flush_deferred(&mut self) -> Result<()> {
        for item in self.deferred.take() {
            trace!("writing deferred referent of {}", item.scopes.name());
            self.encode(&item.scopes, &item.value, &item.env, None, false)?;
            self.flush_deferred()?;
        }
        Ok(())
    }

    fn encode(
        &mut self,
        scopes: &Scopes,
        value: &Value,
        env: &Env,
        hoisted: Option<&[u64]>,
        top: bool,
    ) -> Result<()> {
        let zero;
        let value = match (value, scopes.kind()) {
            (Value::Void, ScopeKind::Void | ScopeKind::BindingHandle | ScopeKind::Pointer) => value,
            (Value::Void, _) => {
                zero = zero_value(self.registry, scopes)?;
                &zero
            }
            _ => value,
        };

        match scopes.kind() {
            ScopeKind::Void | ScopeKind::BindingHandle => Ok(()),
            ScopeKind::ContextHandle => match value {
                Value::ContextHandle { attributes, uuid } => {
                    self.w.write_data(Scalar::U32(*attributes));
                    self.w.write_bytes(uuid);
                    Ok(())
                }
                other => Err(MidlError::mismatch("context handle", other.kind_name())),
            },
            ScopeKind::Primitive(p) => self.encode_primitive(scopes, p, value),
            ScopeKind::Enum => self.encode_enum(scopes, value),
            ScopeKind::Struct => match value {
                Value::Struct(sv) => self.encode_struct(scopes, sv, hoisted),
                other => Err(MidlError::mismatch(scopes.name(), other.kind_name())),
            },
            ScopeKind::Union => match value {
                Value::Union(uv) => self.encode_union(scopes, uv, env),
                other => Err(MidlError::mismatch(scopes.name(), other.kind_name())),
            },
            ScopeKind::Pointer => self.encode_pointer(scopes, value, env, top),
            ScopeKind::Array => self.encode_array(scopes, value, env, hoisted),
            ScopeKind::Pipe => self.encode_pipe(scopes, value, env),
        }
    }

    fn encode_primitive(&mut self, scopes: &Scopes, p: Primitive, value: &Value) -> Result<()> {
        let kind = p.scalar_kind();
        let scalar = if kind.is_float() {
            value.as_f64().map(|v| Scalar::from_f64(kind, v))
        } else if scopes.is_bool() {
            value.as_i64().map(|v| Scalar::from_i64(kind, (v != 0) as i64))
        } else {
            value.as_i64().map(|v| Scalar::from_i64(kind, v))
        };
        let scalar = scalar.ok_or_else(|| MidlError::mismatch(p.as_str(), value.kind_name()))?;
        self.w.write_data(scalar);
        Ok(())
    }

    fn encode_enum(&mut self, scopes: &Scopes, value: &Value) -> Result<()> {
        let v = value
            .as_i64()
            .ok_or_else(|| MidlError::mismatch("enum", value.kind_name()))?;
        if scopes.attrs().v1_enum {
            self.w.write_data(Scalar::I32(v as i32));
            return Ok(());
        }
        if !(0..=i16::MAX as i64).contains(&v) {
            return Err(MidlError::RangeViolation {
                field: scopes.name(),
                value: v,
                min: 0,
                max: i16::MAX as i64,
            });
        }
        self.w.write_data(Scalar::U16(v as u16));
        Ok(())
    }

    fn encode_struct(
        &mut self,
        scopes: &Scopes,
        sv: &StructValue,
        hoisted: Option<&[u64]>,
    ) -> Result<()> {
        let ty = scopes.ty();
        let layout = NdrLayout::for_type(self.registry, ty, self.ndr64)?;
        let members = self.registry.member_scopes(ty)?;
        let env: Env = Arc::new(sv.scalars());

        let sizes = if layout.is_conformant {
            match hoisted {
                Some(sizes) => Some(sizes.to_vec()),
                None => {
                    let sizes = self.struct_sizes(&members, sv, &env)?;
                    write_conformance(&mut *self.w, &sizes);
                    Some(sizes)
                }
            }
        } else {
            None
        };

        self.w.write_align(layout.max_alignment());

        let last = members.len().saturating_sub(1);
        let trailing = if layout.is_conformant_or_varying() {
            last.checked_sub(1)
        } else {
            None
        };

        for (i, field) in members.iter().enumerate() {
            let Some(info) = field.field() else { continue };
            if info.attrs.ignore {
                continue;
            }
            let value = sv.get(&info.name).unwrap_or(&VOID);
            let hoisted = if i == last { sizes.as_deref() } else { None };
            self.encode(field, value, &env, hoisted, false)?;

            if Some(i) == trailing
                && ndr_layout::alignment(self.registry, field, false, self.ndr64)?
                    != layout.alignment
            {
                self.w.write_align(layout.max_alignment());
            }
        }

        if let Some(pad) = scopes.attrs().pad {
            self.w.write_align(pad);
        }
        Ok(())
    }

    /// Conformant sizes a struct hoists for its trailing member
    fn struct_sizes(&self, members: &[Scopes], sv: &StructValue, env: &Env) -> Result<Vec<u64>> {
        let Some(last) = members.last() else {
            return Ok(Vec::new());
        };
        let name = last.field().map(|f| f.name.as_str()).unwrap_or_default();
        let value = sv.get(name).unwrap_or(&VOID);

        match last.kind() {
            ScopeKind::Struct => {
                let zero;
                let inner = match value {
                    Value::Struct(inner) => inner,
                    _ => {
                        zero = zero_value(self.registry, last)?;
                        zero.as_struct()
                            .ok_or_else(|| MidlError::malformed(last.name(), "not a struct"))?
                    }
                };
                let members = self.registry.member_scopes(last.ty())?;
                let inner_env: Env = Arc::new(inner.scalars());
                self.struct_sizes(&members, inner, &inner_env)
            }
            ScopeKind::Array => self.run_sizes(last, value, env),
            _ => Ok(Vec::new()),
        }
    }

    /// `max_count` of every dimension of the run starting at `scopes`
    fn run_sizes(&self, scopes: &Scopes, value: &Value, env: &Env) -> Result<Vec<u64>> {
        let run = scopes.array_run();
        let mut sizes = Vec::with_capacity(run);
        for d in 0..run {
            let Some(layer) = scopes.skip(d) else { break };
            let Some(dim) = layer.dim() else { break };
            let size = match (&dim.size, dim.fixed) {
                (Some(expr), _) => eval_count(expr, env)?,
                (None, Some(fixed)) => fixed,
                (None, None) => measure(&layer, dim, value, d, None),
            };
            sizes.push(size);
        }
        Ok(sizes)
    }

    /// Compute the counts of an array run and write its headers: the
    /// conformance block unless a parent struct already hoisted it, then
    /// one variance pair per dimension when any of them varies
    fn write_headers(
        &mut self,
        scopes: &Scopes,
        value: &Value,
        env: &Env,
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
        let max = if first.is_conformant() {
            match hoisted {
                Some(sizes) if sizes.len() >= run => sizes[..run].to_vec(),
                _ => {
                    let sizes = self.run_sizes(scopes, value, env)?;
                    write_conformance(&mut *self.w, &sizes);
                    sizes
                }
            }
        } else {
            match (&first.size, first.fixed) {
                (Some(expr), _) => vec![eval_count(expr, env)?],
                (None, Some(fixed)) => vec![fixed],
                (None, None) => vec![data_len(scopes, first, value)],
            }
        };

        let mut actual = Vec::with_capacity(run);
        for (d, dim) in dims.iter().enumerate() {
            let count = if let Some(length) = &dim.length {
                eval_count(length, env)?
            } else if dim.is_varying() {
                let layer = scopes.skip(d).unwrap_or_else(|| scopes.clone());
                measure(&layer, dim, value, d, Some(max[d]))
            } else {
                max[d]
            };
            actual.push(count.min(max[d]));
        }

        if dims.iter().any(Dimension::is_varying) {
            for &count in &actual {
                write_variance(&mut *self.w, Variance::new(count));
            }
        }

        Ok(Shape { dims, max, actual })
    }

    fn encode_array(
        &mut self,
        scopes: &Scopes,
        value: &Value,
        env: &Env,
        hoisted: Option<&[u64]>,
    ) -> Result<()> {
        let shape = self.write_headers(scopes, value, env, hoisted)?;
        let element = scopes
            .skip(shape.dims.len())
            .ok_or_else(|| MidlError::malformed(scopes.name(), "array without element"))?;
        self.encode_elements(scopes, value, env, &shape, 0, &element)
    }

    fn encode_elements(
        &mut self,
        scopes: &Scopes,
        value: &Value,
        env: &Env,
        shape: &Shape,
        depth: usize,
        element: &Scopes,
    ) -> Result<()> {
        let count = shape.actual[depth];
        let layer = scopes.skip(depth).unwrap_or_else(|| scopes.clone());
        let dim = &shape.dims[depth];

        if depth + 1 < shape.dims.len() {
            let items: &[Value] = match value {
                Value::Array(items) => items,
                _ => &[],
            };
            truncation_warning(&layer, items.len(), count);
            for i in 0..count as usize {
                let item = items.get(i).unwrap_or(&VOID);
                self.encode_elements(scopes, item, env, shape, depth + 1, element)?;
            }
            return Ok(());
        }

        // character data; a string handed to a plain char array goes
        // out without a terminator
        let width = layer.char_width().or_else(|| match (element.kind(), value) {
            (ScopeKind::Primitive(p), Value::Str(_)) => p.char_width(),
            _ => None,
        });
        if let Some(width) = width {
            let mut units = match value {
                Value::Str(s) if dim.is_string => {
                    bounded_units(s, width, Some(shape.max[depth]), dim.null_terminated)
                }
                Value::Str(s) => to_units(s, width),
                Value::StrList(list) => multi_units(list),
                Value::Bytes(b) => b.iter().map(|&b| u16::from(b)).collect(),
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_i64().unwrap_or(0) as u16)
                    .collect(),
                Value::Void => Vec::new(),
                other => return Err(MidlError::mismatch("string", other.kind_name())),
            };
            truncation_warning(&layer, units.len(), count);
            units.resize(count as usize, 0);
            write_units(&mut *self.w, &units, width);
            return Ok(());
        }

        match (element.kind(), value) {
            (ScopeKind::Primitive(p), Value::Bytes(bytes))
                if p.size(self.ndr64) == 1 && !element.is_bool() =>
            {
                truncation_warning(&layer, bytes.len(), count);
                let mut bytes = bytes.clone();
                bytes.resize(count as usize, 0);
                self.w.write_bytes(&bytes);
            }
            (_, Value::Bytes(bytes)) => {
                truncation_warning(&layer, bytes.len(), count);
                for i in 0..count as usize {
                    let item = bytes.get(i).map_or(Value::Void, |&b| Value::U8(b));
                    self.encode(element, &item, env, None, false)?;
                }
            }
            (_, Value::Array(items)) => {
                truncation_warning(&layer, items.len(), count);
                for i in 0..count as usize {
                    let item = items.get(i).unwrap_or(&VOID);
                    self.encode(element, item, env, None, false)?;
                }
            }
            (_, Value::Void) => {
                for _ in 0..count {
                    self.encode(element, &VOID, env, None, false)?;
                }
            }
            (_, other) => return Err(MidlError::mismatch("array", other.kind_name())),
        }
        Ok(())
    }

    fn encode_pointer(
        &mut self,
        scopes: &Scopes,
        value: &Value,
        env: &Env,
        top: bool,
    ) -> Result<()> {
        let next = scopes
            .next()
            .ok_or_else(|| MidlError::malformed(scopes.name(), "pointer without target"))?;
        let kind = scopes.pointer_kind();
        let to_primitive = matches!(next.kind(), ScopeKind::Primitive(_));

        let mut target = match value {
            Value::Pointer(Some(referent)) => Some(referent.as_ref().clone()),
            Value::Pointer(None) => None,
            // an absent pointer to a primitive points at its zero value
            Value::Void if to_primitive => Some(Value::Void),
            Value::Void => None,
            other => Some(other.clone()),
        };

        if scopes.is_first() && to_primitive {
            if let Some(conditions) = scopes.field_attrs().and_then(|a| a.default_null.as_ref()) {
                let null = if conditions.is_empty() {
                    target.as_ref().map_or(true, Value::is_zero)
                } else {
                    let mut null = false;
                    for condition in conditions {
                        if condition.eval(&**env)? == 0 {
                            null = true;
                            break;
                        }
                    }
                    null
                };
                if null {
                    target = None;
                }
            }
        }

        if target.is_none() {
            let allocate = match (kind, next.dim()) {
                (PointerKind::Ref, _) => true,
                (_, Some(dim)) if dim.is_conformant() => match &dim.size {
                    Some(size) => eval_count(size, env)? > 0,
                    None => false,
                },
                _ => false,
            };
            if allocate {
                trace!("null {:?} pointer {} written with a zero referent", kind, scopes.name());
                target = Some(Value::Void);
            }
        }

        if top && kind == PointerKind::Ref {
            let referent = target.unwrap_or_default();
            return self.encode(&next, &referent, env, None, false);
        }

        let id = self.w.write_pointer(target.is_none());
        if let Some(referent) = target {
            trace!("deferred referent 0x{:x} of {}", id, scopes.name());
            self.deferred.push(Deferred {
                scopes: next,
                value: referent,
                env: env.clone(),
            });
        }
        Ok(())
    }

    fn encode_union(&mut self, scopes: &Scopes, uv: &UnionValue, env: &Env) -> Result<()> {
        let ty = scopes.ty();
        let union = ty
            .as_union()
            .ok_or_else(|| MidlError::malformed(ty.display_name(), "not a union"))?;
        let members = self.registry.member_scopes(ty)?;

        if union.is_c_style() {
            let (Some(arm), Some(member)) = (union.arms.first(), members.first()) else {
                return Err(MidlError::malformed(ty.display_name(), "union has no arms"));
            };
            return self.encode(member, arm_value(arm.name(), uv), env, None, false);
        }

        let switch_is = scopes.field_attrs().and_then(|a| a.switch_is.as_ref());
        let discriminant = match (switch_is, uv.discriminant) {
            (Some(expr), _) if !union.is_encapsulated() => expr.eval(&**env)?,
            (_, Some(d)) => d,
            _ => union
                .arm_by_name(&uv.arm)
                .and_then(|arm| arm.labels.first().copied())
                .ok_or_else(|| MidlError::InvalidDiscriminant {
                    name: ty.display_name(),
                    value: 0,
                })?,
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

        if let Some(switch_ty) = union.switch_type() {
            let switch = self.registry.scopes(switch_ty)?;
            match switch.kind() {
                ScopeKind::Primitive(p) => {
                    self.w.write_switch(Scalar::from_i64(p.scalar_kind(), discriminant))
                }
                _ => self.encode(&switch, &Value::I64(discriminant), env, None, false)?,
            }
        }

        if union.is_encapsulated() {
            let layout = NdrLayout::for_type(self.registry, ty, self.ndr64)?;
            self.w.write_align(layout.max_alignment());
        }

        let value = arm_value(union.arms[idx].name(), uv);
        self.encode(&members[idx], value, env, None, false)
    }

    fn encode_pipe(&mut self, scopes: &Scopes, value: &Value, env: &Env) -> Result<()> {
        let members = self.registry.member_scopes(scopes.ty())?;
        let element = members
            .first()
            .ok_or_else(|| MidlError::malformed(scopes.name(), "pipe without element"))?;

        let items: Vec<Value> = match value {
            Value::Array(items) => items.clone(),
            Value::Bytes(bytes) => bytes.iter().map(|&b| Value::U8(b)).collect(),
            Value::Void => Vec::new(),
            other => return Err(MidlError::mismatch("pipe", other.kind_name())),
        };

        if !items.is_empty() {
            self.w.write_size(items.len() as u64);
            for item in &items {
                self.encode(element, item, env, None, false)?;
            }
        }
        self.w.write_size(0);
        Ok(())
    }
}

/// The value to encode for the selected arm: the supplied one when the
/// names agree, otherwise the arm's zero value
fn arm_value<'v>(arm: &str, uv: &'v UnionValue) -> &'v Value {
    if uv.arm == arm {
        &uv.value
    } else {
        warn!("union value holds arm {}, encoding zero value of arm {}", uv.arm, arm);
        &VOID
    }
}

fn truncation_warning(layer: &Scopes, have: usize, count: u64) {
    if have as u64 > count {
        warn!("{} truncated from {} to {} elements", layer.name(), have, count);
    }
}

/// Element count `value` supplies at `depth` of an array run, limited
/// to `bound`
fn measure(
    layer: &Scopes,
    dim: &Dimension,
    value: &Value,
    depth: usize,
    bound: Option<u64>,
) -> u64 {
    if depth > 0 {
        return match value {
            Value::Array(items) => items
                .iter()
                .map(|item| measure(layer, dim, item, depth - 1, bound))
                .max()
                .unwrap_or(0),
            _ => 0,
        };
    }

    let len = data_len(layer, dim, value);
    match bound {
        Some(bound) => len.min(bound),
        None => len,
    }
}
