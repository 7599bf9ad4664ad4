//! Zero values
//!
//! Once a pointer has been written as non-null its referent must be fully
//! present on the wire, so absent values are replaced by a canonical zero
//! of the right shape. Zero values have the same form the decoder produces
//! for an all-zero payload.

use midl_ndr::Scalar;

use crate::error::{MidlError, Result};
use crate::registry::Registry;
use crate::scopes::{ScopeKind, Scopes};
use crate::value::{StructValue, UnionValue, Value};

/// Canonical zero value for the layer `scopes` points at
pub fn zero_value(registry: &Registry, scopes: &Scopes) -> Result<Value> {
    Ok(match scopes.kind() {
        ScopeKind::Void | ScopeKind::BindingHandle => Value::Void,
        ScopeKind::ContextHandle => Value::ContextHandle {
            attributes: 0,
            uuid: [0; 16],
        },
        ScopeKind::Primitive(p) => {
            if scopes.is_bool() {
                Value::Bool(false)
            } else {
                Value::from_scalar(Scalar::zero(p.scalar_kind()))
            }
        }
        ScopeKind::Enum => Value::Enum(0),
        ScopeKind::Pointer => Value::Pointer(None),
        ScopeKind::Pipe => Value::Array(Vec::new()),
        ScopeKind::Struct => {
            let members = registry.member_scopes(scopes.ty())?;
            let mut fields = Vec::with_capacity(members.len());
            for member in members.iter() {
                let name = member.field().map(|f| f.name.clone()).unwrap_or_default();
                fields.push((name, zero_value(registry, member)?));
            }
            Value::Struct(StructValue { fields })
        }
        ScopeKind::Union => {
            let ty = scopes.ty();
            let union = ty
                .as_union()
                .ok_or_else(|| MidlError::malformed(ty.display_name(), "not a union"))?;
            let arm = union
                .arms
                .first()
                .ok_or_else(|| MidlError::malformed(ty.display_name(), "union has no arms"))?;
            let members = registry.member_scopes(ty)?;
            let value = match members.first() {
                Some(member) => zero_value(registry, member)?,
                None => Value::Void,
            };
            Value::Union(UnionValue {
                discriminant: if union.is_c_style() {
                    None
                } else {
                    Some(arm.labels.first().copied().unwrap_or(0))
                },
                arm: arm.name().to_string(),
                value: Box::new(value),
            })
        }
        ScopeKind::Array => {
            let dim = scopes
                .dim()
                .ok_or_else(|| MidlError::malformed(scopes.name(), "array without dimension"))?;
            if dim.is_string {
                return Ok(if dim.multi_size {
                    Value::StrList(Vec::new())
                } else {
                    Value::Str(String::new())
                });
            }

            let count = if dim.is_fixed() {
                dim.fixed.unwrap_or(0) as usize
            } else {
                0
            };
            let element = scopes
                .next()
                .ok_or_else(|| MidlError::malformed(scopes.name(), "array without element"))?;
            match element.kind() {
                ScopeKind::Primitive(p) if p.is_byte() && !element.is_bool() => {
                    Value::Bytes(vec![0; count])
                }
                _ => {
                    let zero = zero_value(registry, &element)?;
                    Value::Array(vec![zero; count])
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;
    use crate::types::{Field, Primitive, Type, UnionArm, UnionType};
    use midl_ndr::PointerKind;

    #[test]
    fn test_zero_struct_shape() {
        let s = Type::structure(
            "S",
            vec![
                Field::new("Flag", Type::named("BOOL")),
                Field::new("Id", Type::named("GUID")),
                Field::new("Name", Type::named("LPWSTR")),
                Field::new("Tag", Type::array(Type::named("wchar_t"), 4)).string(),
                Field::new("Words", Type::array(Type::named("USHORT"), 2)),
            ],
        );
        let registry = RegistryBuilder::new().register_type(s.clone()).unwrap().build().unwrap();
        let zero = zero_value(&registry, &registry.scopes(&s).unwrap()).unwrap();
        let zero = zero.as_struct().unwrap();

        assert_eq!(zero.get("Flag"), Some(&Value::Bool(false)));
        assert_eq!(zero.get("Name"), Some(&Value::Pointer(None)));
        assert_eq!(zero.get("Tag"), Some(&Value::Str(String::new())));
        assert_eq!(
            zero.get("Words"),
            Some(&Value::Array(vec![Value::U16(0), Value::U16(0)]))
        );
        let guid = zero.get("Id").unwrap().as_struct().unwrap();
        assert_eq!(guid.get("Data4"), Some(&Value::Bytes(vec![0; 8])));
    }

    #[test]
    fn test_zero_union_takes_first_arm() {
        let u = Type::union(
            "U",
            UnionType::encapsulated("Tag", Type::primitive(Primitive::Uint32))
                .arm(UnionArm::case(&[4, 5], Field::new("Value", Type::named("hyper"))))
                .arm(UnionArm::default(Field::new("Empty", Type::void()))),
        );
        let registry = RegistryBuilder::new().register_type(u.clone()).unwrap().build().unwrap();
        let zero = zero_value(&registry, &registry.scopes(&u).unwrap()).unwrap();
        assert_eq!(
            zero,
            Value::Union(UnionValue::new("Value", Value::I64(0)).with_discriminant(4))
        );
    }

    #[test]
    fn test_zero_pointer_is_null() {
        let registry = RegistryBuilder::new().build().unwrap();
        let ty = Type::pointer(PointerKind::Ref, Type::named("long"));
        assert_eq!(
            zero_value(&registry, &registry.scopes(&ty).unwrap()).unwrap(),
            Value::Pointer(None)
        );
    }
}
