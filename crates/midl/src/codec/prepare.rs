//! Payload preparation
//!
//! Runs over a private copy of the value before any byte is written:
//!
//! - fields are put in declaration order, absent fields become `Void`
//! - a zero size/length sibling is derived from the data it describes
//! - a sibling below the minimum its expression needs is raised to it
//! - zero fields with a default value get that value
//! - `[range]` limits are checked

use midl_ndr::{multi_units, wire_len, CharWidth};
use tracing::debug;

use crate::error::{MidlError, Result};
use crate::expr::Expr;
use crate::registry::Registry;
use crate::scopes::{ScopeKind, Scopes};
use crate::types::{Dimension, Range};
use crate::value::{StructValue, Value};

/// Prepare `value` for marshaling as `scopes`
pub(crate) fn prepare(registry: &Registry, scopes: &Scopes, value: &mut Value) -> Result<()> {
    match scopes.kind() {
        ScopeKind::Struct => match value {
            Value::Struct(sv) => prepare_struct(registry, scopes, sv),
            Value::Void => Ok(()),
            other => Err(MidlError::mismatch(scopes.name(), other.kind_name())),
        },
        ScopeKind::Union => {
            let Value::Union(uv) = value else {
                return Ok(());
            };
            let ty = scopes.ty();
            let Some(union) = ty.as_union() else {
                return Ok(());
            };
            let members = registry.member_scopes(ty)?;
            match union.arms.iter().position(|arm| arm.name() == uv.arm) {
                Some(idx) => prepare(registry, &members[idx], &mut uv.value),
                None => Ok(()),
            }
        }
        ScopeKind::Pointer => {
            let Some(next) = scopes.next() else {
                return Ok(());
            };
            match value {
                Value::Pointer(Some(referent)) => prepare(registry, &next, referent),
                Value::Pointer(None) | Value::Void => Ok(()),
                other => prepare(registry, &next, other),
            }
        }
        ScopeKind::Array => {
            let Some(next) = scopes.next() else {
                return Ok(());
            };
            if let Value::Array(items) = value {
                for item in items {
                    prepare(registry, &next, item)?;
                }
            }
            Ok(())
        }
        ScopeKind::Pipe => {
            let members = registry.member_scopes(scopes.ty())?;
            if let (Value::Array(items), Some(element)) = (value, members.first()) {
                for item in items {
                    prepare(registry, element, item)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn prepare_struct(registry: &Registry, scopes: &Scopes, sv: &mut StructValue) -> Result<()> {
    let ty = scopes.ty();
    let def = ty
        .as_struct()
        .ok_or_else(|| MidlError::malformed(ty.display_name(), "not a struct"))?;
    let members = registry.member_scopes(ty)?;

    if let Some((name, _)) = sv.fields.iter().find(|(name, _)| def.field(name).is_none()) {
        return Err(MidlError::mismatch(
            format!("field of {}", ty.display_name()),
            name.as_str(),
        ));
    }

    let mut ordered = Vec::with_capacity(def.fields.len());
    for field in &def.fields {
        let value = sv.take(&field.name).unwrap_or_default();
        ordered.push((field.name.clone(), value));
    }
    sv.fields = ordered;

    for field in members.iter() {
        derive_sizes(field, sv)?;
    }

    for (field, scopes) in def.fields.iter().zip(members.iter()) {
        if let Some(default) = &field.attrs.default_value {
            if sv.get(&field.name).map_or(true, Value::is_zero) {
                let value = default.eval(&sv.scalars())?;
                let current = sv.get(&field.name).cloned().unwrap_or_default();
                sv.set(field.name.as_str(), current.with_integer(value));
            }
        }
        if let Some(range) = scopes.range() {
            check_range(&field.name, scopes, sv.get(&field.name), range)?;
        }
    }

    for (i, member) in members.iter().enumerate() {
        if let Some((_, value)) = sv.fields.get_mut(i) {
            prepare(registry, member, value)?;
        }
    }
    Ok(())
}

/// Walk the field's chain through pointer layers to its first array
fn first_array<'v>(
    field: &Scopes,
    value: Option<&'v Value>,
) -> Option<(Scopes, Option<&'v Value>)> {
    let mut scopes = field.clone();
    let mut value = value;
    loop {
        match scopes.kind() {
            ScopeKind::Array => return Some((scopes, value)),
            ScopeKind::Pointer => {
                value = match value {
                    Some(Value::Pointer(Some(referent))) => Some(&**referent),
                    Some(Value::Pointer(None)) | Some(Value::Void) | None => None,
                    other => other,
                };
                scopes = scopes.next()?;
            }
            _ => return None,
        }
    }
}

/// Number of elements `value` supplies for the array dimension at `scopes`
pub(crate) fn data_len(scopes: &Scopes, dim: &Dimension, value: &Value) -> u64 {
    match value {
        Value::Str(s) => {
            let width = scopes.char_width().unwrap_or(CharWidth::Byte);
            wire_len(s, width, dim.null_terminated) as u64
        }
        Value::StrList(list) => multi_units(list).len() as u64,
        Value::Bytes(b) => b.len() as u64,
        Value::Array(items) => items.len() as u64,
        _ => 0,
    }
}

fn derive_sizes(field: &Scopes, sv: &mut StructValue) -> Result<()> {
    let Some(info) = field.field() else {
        return Ok(());
    };
    let Some((array, data)) = first_array(field, sv.get(&info.name)) else {
        return Ok(());
    };
    let Some(dim) = array.dim() else {
        return Ok(());
    };
    let len = data.map_or(0, |v| data_len(&array, dim, v));

    for expr in [dim.size.as_ref(), dim.length.as_ref()].into_iter().flatten() {
        derive_one(expr, len, sv);
    }
    Ok(())
}

fn derive_one(expr: &Expr, len: u64, sv: &mut StructValue) {
    let Some(target) = expr.target_ident().map(str::to_string) else {
        return;
    };
    let Some(current) = sv.get(&target).cloned() else {
        return;
    };

    if len > 0 && current.as_i64() == Some(0) {
        if let Some((ident, solved)) = expr.solve(len as i64) {
            let solved = solved.max(0);
            debug!("derived {} = {} from data length {}", ident, solved, len);
            sv.set(ident, current.with_integer(solved));
        }
    }

    if let Some((ident, min)) = expr.min_ident_value() {
        let Some(value) = sv.get(ident).cloned() else {
            return;
        };
        if value.as_i64().is_some_and(|v| v < min) {
            debug!("raised {} to minimum {}", ident, min);
            sv.set(ident, value.with_integer(min));
        }
    }
}

fn check_range(name: &str, scopes: &Scopes, value: Option<&Value>, range: Range) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    let value = match value {
        Value::Pointer(Some(referent)) => referent.as_ref(),
        other => other,
    };
    let measured = match value {
        Value::Str(s) => Some(s.chars().count() as i64),
        Value::StrList(_) | Value::Array(_) | Value::Bytes(_) => value.len().map(|n| n as i64),
        Value::Void | Value::Pointer(None) => None,
        other => other.as_i64(),
    };
    let Some(measured) = measured else {
        return Ok(());
    };

    let is_sequence = matches!(
        value,
        Value::Str(_) | Value::StrList(_) | Value::Array(_) | Value::Bytes(_)
    );
    let violated = if is_sequence {
        measured > range.max
    } else {
        !range.contains(measured)
    };
    if violated {
        return Err(MidlError::RangeViolation {
            field: if name.is_empty() { scopes.name() } else { name.to_string() },
            value: measured,
            min: range.min,
            max: range.max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;
    use crate::types::{Field, Type};
    use midl_ndr::PointerKind;

    fn prepared(fields: Vec<Field>, value: StructValue) -> Result<StructValue> {
        let s = Type::structure("S", fields);
        let registry = RegistryBuilder::new().register_type(s.clone())?.build()?;
        let mut value = Value::Struct(value);
        prepare(&registry, &registry.scopes(&s)?, &mut value)?;
        match value {
            Value::Struct(sv) => Ok(sv),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_size_derived_from_buffer() {
        let sv = prepared(
            vec![
                Field::new("Size", Type::named("DWORD")),
                Field::new("Buffer", Type::pointer(PointerKind::Unique, Type::named("byte")))
                    .size_is(&["Size"])
                    .unwrap(),
            ],
            StructValue::new().with("Buffer", Value::pointer(vec![1u8, 2, 3])),
        )
        .unwrap();
        assert_eq!(sv.get("Size"), Some(&Value::I64(3)));
    }

    #[test]
    fn test_size_derived_through_arithmetic() {
        let sv = prepared(
            vec![
                Field::new("cb", Type::named("USHORT")),
                Field::new("Name", Type::pointer(PointerKind::Unique, Type::named("wchar_t")))
                    .size_is(&["cb / 2"])
                    .unwrap(),
            ],
            StructValue::new()
                .with("cb", 0u16)
                .with("Name", Value::pointer(vec![Value::U16(65); 4])),
        )
        .unwrap();
        assert_eq!(sv.get("cb"), Some(&Value::U16(8)));
    }

    #[test]
    fn test_minimum_clamp() {
        let sv = prepared(
            vec![
                Field::new("Count", Type::named("DWORD")),
                Field::new("Items", Type::pointer(PointerKind::Unique, Type::named("DWORD")))
                    .size_is(&["Count - 1"])
                    .unwrap(),
            ],
            StructValue::new().with("Count", 0u32),
        )
        .unwrap();
        assert_eq!(sv.get("Count"), Some(&Value::U32(1)));
    }

    #[test]
    fn test_fields_ordered_and_filled() {
        let sv = prepared(
            vec![
                Field::new("a", Type::named("long")),
                Field::new("b", Type::named("long")),
            ],
            StructValue::new().with("b", 2i32),
        )
        .unwrap();
        assert_eq!(sv.fields[0], ("a".to_string(), Value::Void));
        assert_eq!(sv.fields[1], ("b".to_string(), Value::I32(2)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = prepared(
            vec![Field::new("a", Type::named("long"))],
            StructValue::new().with("zz", 1i32),
        )
        .unwrap_err();
        assert!(matches!(err, MidlError::TypeMismatch { .. }));
    }

    #[test]
    fn test_default_value() {
        let sv = prepared(
            vec![
                Field::new("Version", Type::named("DWORD")).default_value("0x10").unwrap(),
            ],
            StructValue::new(),
        )
        .unwrap();
        assert_eq!(sv.get("Version"), Some(&Value::I64(16)));
    }

    #[test]
    fn test_range_violation() {
        let err = prepared(
            vec![Field::new("Level", Type::named("DWORD")).range(1, 3)],
            StructValue::new().with("Level", 7u32),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MidlError::RangeViolation { ref field, value: 7, min: 1, max: 3 } if field == "Level"
        ));

        let err = prepared(
            vec![Field::new("Data", Type::conformant(Type::named("byte")))
                .size_is(&["8"])
                .unwrap()
                .range(0, 4)],
            StructValue::new().with("Data", vec![0u8; 5]),
        )
        .unwrap_err();
        assert!(matches!(err, MidlError::RangeViolation { value: 5, .. }));
    }
}
