//! Complex type marshaling scenarios
//!
//! Exercises the shared registry end to end: derived sizes, unions switched
//! by a sibling, embedded strings, arrays of structs with deferred referents,
//! interface pointers and the decoder's bounds checks.

use integration_tests::{init_tracing, sample_registry};
use midl::{
    Field, MidlError, NdrContext, PointerKind, Registry, StructValue, Type, UnionValue, Value,
};
use midl_ndr::NdrError;

fn field<'a>(value: &'a Value, name: &str) -> &'a Value {
    value
        .as_struct()
        .and_then(|s| s.get(name))
        .unwrap_or_else(|| panic!("missing field {name}"))
}

#[test]
fn test_blob_size_derived_from_data() {
    init_tracing();
    let registry = sample_registry();
    let codec = registry.codec("BLOB").unwrap();

    let value: Value = StructValue::new()
        .with("pBlobData", Value::pointer(vec![0xDEu8, 0xAD, 0xBE, 0xEF, 0x01]))
        .into();
    let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();

    assert_eq!(
        &bytes[..],
        &[
            5, 0, 0, 0, // cbSize
            0, 0, 2, 0, // referent id
            5, 0, 0, 0, // max count
            0xDE, 0xAD, 0xBE, 0xEF, 0x01,
        ]
    );

    let decoded = codec.from_bytes(bytes, NdrContext::default()).unwrap();
    assert_eq!(field(&decoded, "cbSize"), &Value::U32(5));
    assert_eq!(
        field(&decoded, "pBlobData"),
        &Value::pointer(vec![0xDEu8, 0xAD, 0xBE, 0xEF, 0x01])
    );
}

#[test]
fn test_size_and_length_derived_together() {
    init_tracing();
    let sized = Type::structure(
        "SIZED_BUFFER",
        vec![
            Field::new("Size", Type::named("DWORD")),
            Field::new("Buffer", Type::pointer(PointerKind::Unique, Type::named("BYTE")))
                .size_is(&["Size"])
                .and_then(|f| f.length_is(&["Size"]))
                .unwrap(),
        ],
    );
    let registry = Registry::builder().register_type(sized).unwrap().build().unwrap();
    let codec = registry.codec("SIZED_BUFFER").unwrap();

    let value: Value = StructValue::new()
        .with("Size", 0u32)
        .with("Buffer", Value::pointer(vec![1u8, 2, 3]))
        .into();
    let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();
    assert_eq!(
        &bytes[..],
        &[
            3, 0, 0, 0, // Size
            0, 0, 2, 0, // referent id
            3, 0, 0, 0, // max count
            0, 0, 0, 0, 3, 0, 0, 0, // offset, actual count
            1, 2, 3,
        ]
    );
}

#[test]
fn test_unicode_string_lengths_derived() {
    init_tracing();
    let registry = sample_registry();
    let codec = registry.codec("RPC_UNICODE_STRING").unwrap();

    let value: Value = StructValue::new()
        .with("Buffer", Value::pointer("abc"))
        .into();
    let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();

    assert_eq!(
        &bytes[..],
        &[
            6, 0, 6, 0, // Length, MaximumLength in bytes
            0, 0, 2, 0, // referent id
            3, 0, 0, 0, // max count
            0, 0, 0, 0, 3, 0, 0, 0, // offset, actual count
            b'a', 0, b'b', 0, b'c', 0,
        ]
    );

    let decoded = codec.from_bytes(bytes, NdrContext::default()).unwrap();
    assert_eq!(field(&decoded, "Length"), &Value::U16(6));
    assert_eq!(field(&decoded, "MaximumLength"), &Value::U16(6));
    assert_eq!(
        field(&decoded, "Buffer"),
        &Value::pointer(vec![Value::U16(97), Value::U16(98), Value::U16(99)])
    );
}

#[test]
fn test_union_switched_by_sibling() {
    init_tracing();
    let registry = sample_registry();
    let codec = registry.codec("TAGGED_VALUE").unwrap();

    let value: Value = StructValue::new()
        .with("Kind", 6u32)
        .with("Value", UnionValue::new("Wide", 0x1122_3344_5566_7788u64))
        .into();
    let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();

    assert_eq!(
        &bytes[..],
        &[
            6, 0, 0, 0, // Kind
            6, 0, 0, 0, // discriminant
            0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11,
        ]
    );

    let decoded = codec.from_bytes(bytes, NdrContext::default()).unwrap();
    let arm = field(&decoded, "Value").as_union().unwrap();
    assert_eq!(arm.discriminant, Some(6));
    assert_eq!(arm.arm, "Wide");
    assert_eq!(*arm.value, Value::U64(0x1122_3344_5566_7788));
}

#[test]
fn test_union_unknown_discriminant_rejected() {
    init_tracing();
    let registry = sample_registry();
    let codec = registry.codec("TAGGED_VALUE").unwrap();

    // Kind is absent, so the switch evaluates to 0 and no arm matches
    let value: Value = StructValue::new()
        .with("Value", UnionValue::new("Short", 1u32))
        .into();
    let err = codec.to_bytes(&value, NdrContext::default()).unwrap_err();
    assert!(matches!(err, MidlError::InvalidDiscriminant { value: 0, .. }));

    let wire = vec![4u8, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];
    let err = codec.from_bytes(wire, NdrContext::default()).unwrap_err();
    assert!(matches!(err, MidlError::InvalidDiscriminant { value: 4, .. }));
}

#[test]
fn test_embedded_guid_key_and_string() {
    init_tracing();
    let registry = sample_registry();
    let codec = registry.codec("KEY_RECORD").unwrap();

    let value: Value = StructValue::new()
        .with("Key", vec![0xAAu8; 3])
        .with("Label", "hi")
        .into();
    let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();

    assert_eq!(bytes.len(), 46);
    assert!(bytes[..16].iter().all(|&b| b == 0), "zero GUID");
    assert_eq!(&bytes[16..19], &[0xAA; 3]);
    assert!(bytes[19..32].iter().all(|&b| b == 0), "key zero-filled");
    assert_eq!(
        &bytes[32..],
        &[0, 0, 0, 0, 3, 0, 0, 0, b'h', 0, b'i', 0, 0, 0]
    );

    let decoded = codec.from_bytes(bytes, NdrContext::default()).unwrap();
    let guid: Value = StructValue::new()
        .with("Data1", 0u32)
        .with("Data2", 0u16)
        .with("Data3", 0u16)
        .with("Data4", vec![0u8; 8])
        .into();
    assert_eq!(field(&decoded, "Id"), &guid);
    let mut key = vec![0xAAu8; 3];
    key.resize(16, 0);
    assert_eq!(field(&decoded, "Key"), &Value::Bytes(key));
    assert_eq!(field(&decoded, "Label"), &Value::from("hi"));
}

#[test]
fn test_array_of_structs_with_deferred_strings() {
    init_tracing();
    let registry = sample_registry();
    let codec = registry.codec("NAME_LIST").unwrap();

    let names = vec![
        Value::from(StructValue::new().with("Buffer", Value::pointer("a"))),
        Value::from(StructValue::new().with("Buffer", Value::pointer("bc"))),
    ];
    let value: Value = StructValue::new().with("Names", names).into();
    let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();

    #[rustfmt::skip]
    let expected: &[u8] = &[
        2, 0, 0, 0,                 // hoisted max count
        2, 0, 0, 0,                 // Count
        2, 0, 2, 0, 0, 0, 2, 0,     // Names[0]
        4, 0, 4, 0, 4, 0, 2, 0,     // Names[1]
        1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, b'a', 0, 0, 0,
        2, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, b'b', 0, b'c', 0,
    ];
    assert_eq!(&bytes[..], expected);

    let decoded = codec.from_bytes(bytes, NdrContext::default()).unwrap();
    assert_eq!(field(&decoded, "Count"), &Value::U32(2));
    let Value::Array(items) = field(&decoded, "Names") else {
        panic!("Names is not an array");
    };
    assert_eq!(items.len(), 2);
    assert_eq!(field(&items[0], "Length"), &Value::U16(2));
    assert_eq!(field(&items[1], "MaximumLength"), &Value::U16(4));
    assert_eq!(
        field(&items[1], "Buffer"),
        &Value::pointer(vec![Value::U16(98), Value::U16(99)])
    );
}

#[test]
fn test_interface_pointer() {
    init_tracing();
    let registry = sample_registry();
    let ty = Type::pointer(PointerKind::Unique, Type::interface("IUnknown"));
    let codec = registry.codec_for(ty).unwrap();

    let value = Value::pointer(StructValue::new().with("abData", vec![0xAAu8, 0xBB]));
    let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();
    assert_eq!(
        &bytes[..],
        &[0, 0, 2, 0, 2, 0, 0, 0, 2, 0, 0, 0, 0xAA, 0xBB]
    );

    let decoded = codec.from_bytes(bytes, NdrContext::default()).unwrap();
    let obj = decoded.referent().unwrap();
    assert_eq!(field(obj, "ulCntData"), &Value::U32(2));
    assert_eq!(field(obj, "abData"), &Value::Bytes(vec![0xAA, 0xBB]));
}

#[test]
fn test_multi_string() {
    init_tracing();
    let multi = Type::structure(
        "MULTI_NAMES",
        vec![Field::new("Names", Type::named("LPWSTR")).multi_size()],
    );
    let registry = Registry::builder().register_type(multi).unwrap().build().unwrap();
    let codec = registry.codec("MULTI_NAMES").unwrap();

    let list = vec!["a".to_string(), "b".to_string()];
    let value: Value = StructValue::new()
        .with("Names", Value::pointer(list.clone()))
        .into();
    let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();
    assert_eq!(
        &bytes[..],
        &[0, 0, 2, 0, 5, 0, 0, 0, b'a', 0, 0, 0, b'b', 0, 0, 0, 0, 0]
    );

    let decoded = codec.from_bytes(bytes, NdrContext::default()).unwrap();
    assert_eq!(field(&decoded, "Names"), &Value::pointer(list));
}

#[test]
fn test_struct_alignment_padding() {
    init_tracing();
    let mixed = Type::structure(
        "MIXED",
        vec![
            Field::new("a", Type::named("small")),
            Field::new("b", Type::named("hyper")),
            Field::new("c", Type::named("short")),
        ],
    );
    let registry = Registry::builder().register_type(mixed).unwrap().build().unwrap();
    let codec = registry.codec("MIXED").unwrap();

    let layout = codec.layout(false).unwrap().unwrap();
    assert_eq!(layout.alignment, 8);
    assert!(!layout.is_conformant_or_varying());

    let value: Value = StructValue::new()
        .with("a", 1i8)
        .with("b", 2i64)
        .with("c", 3i16)
        .into();
    let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();
    assert_eq!(
        &bytes[..],
        &[1, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 3, 0]
    );
}

#[test]
fn test_ndr64_and_big_endian_round_trips() {
    init_tracing();
    let registry = sample_registry();
    let codec = registry.codec("NAME_LIST").unwrap();

    let names = vec![
        Value::from(StructValue::new().with("Buffer", Value::pointer("first"))),
        Value::from(StructValue::new().with("Buffer", Value::pointer("second"))),
        Value::from(StructValue::new().with("Buffer", Value::null())),
    ];
    let value: Value = StructValue::new().with("Names", names).into();

    let reference = codec
        .from_bytes(
            codec.to_bytes(&value, NdrContext::default()).unwrap(),
            NdrContext::default(),
        )
        .unwrap();

    for ctx in [
        NdrContext::default().with_ndr64(true),
        NdrContext::big_endian(),
        NdrContext::big_endian().with_ndr64(true),
    ] {
        let bytes = codec.to_bytes(&value, ctx).unwrap();
        let decoded = codec.from_bytes(bytes, ctx).unwrap();
        assert_eq!(decoded, reference, "round trip under {ctx:?}");
    }

    let Value::Array(items) = field(&reference, "Names") else {
        panic!("Names is not an array");
    };
    assert_eq!(field(&items[2], "Buffer"), &Value::null());
}

#[test]
fn test_truncated_input_is_rejected() {
    init_tracing();
    let registry = sample_registry();
    let codec = registry.codec("BLOB").unwrap();

    // max count claims far more bytes than the buffer holds
    let wire = vec![0xFFu8, 0xFF, 0, 0, 0, 0, 2, 0, 0xFF, 0xFF, 0, 0, 1, 2];
    let err = codec.from_bytes(wire, NdrContext::default()).unwrap_err();
    assert!(matches!(
        err,
        MidlError::Ndr(NdrError::BufferOverflow { size: 0xFFFF, have: 2 })
    ));

    let wire = vec![4u8, 0, 0, 0, 0, 0, 2, 0, 4, 0, 0, 0, 1, 2, 3, 4];
    let ctx = NdrContext::default().with_max_elements(3);
    let err = codec.from_bytes(wire, ctx).unwrap_err();
    assert!(matches!(
        err,
        MidlError::Ndr(NdrError::AllocationLimitExceeded { requested: 4, limit: 3 })
    ));

    let err = codec
        .from_bytes(vec![1u8, 0], NdrContext::default())
        .unwrap_err();
    assert!(matches!(err, MidlError::Ndr(_)));
}
