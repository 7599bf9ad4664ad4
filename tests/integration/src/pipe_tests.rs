//! Pipe marshaling
//!
//! A pipe travels as chunks, each a count followed by that many elements,
//! and ends with an empty chunk.

use std::sync::Arc;

use integration_tests::init_tracing;
use midl::{MidlError, NdrContext, Registry, StructValue, Type, TypeCodec, Value};
use midl_ndr::NdrError;

fn pipe_codec(element: &str) -> TypeCodec {
    let registry: Arc<Registry> = Registry::builder().build().unwrap();
    registry.codec_for(Type::pipe(Type::named(element))).unwrap()
}

#[test]
fn test_byte_pipe_single_chunk() {
    init_tracing();
    let codec = pipe_codec("BYTE");

    let bytes = codec
        .to_bytes(&Value::Bytes(vec![1, 2, 3]), NdrContext::default())
        .unwrap();
    assert_eq!(&bytes[..], &[3, 0, 0, 0, 1, 2, 3, 0, 0, 0, 0, 0]);

    let decoded = codec.from_bytes(bytes, NdrContext::default()).unwrap();
    assert_eq!(
        decoded,
        Value::Array(vec![Value::U8(1), Value::U8(2), Value::U8(3)])
    );
}

#[test]
fn test_empty_pipe() {
    init_tracing();
    let codec = pipe_codec("DWORD");

    let bytes = codec
        .to_bytes(&Value::Array(Vec::new()), NdrContext::default())
        .unwrap();
    assert_eq!(&bytes[..], &[0, 0, 0, 0]);

    let decoded = codec.from_bytes(bytes, NdrContext::default()).unwrap();
    assert_eq!(decoded, Value::Array(Vec::new()));
}

#[test]
fn test_chunks_are_concatenated() {
    init_tracing();
    let codec = pipe_codec("LONG");

    #[rustfmt::skip]
    let wire = vec![
        1, 0, 0, 0, 5, 0, 0, 0,
        2, 0, 0, 0, 6, 0, 0, 0, 7, 0, 0, 0,
        0, 0, 0, 0,
    ];
    let decoded = codec.from_bytes(wire, NdrContext::default()).unwrap();
    assert_eq!(
        decoded,
        Value::Array(vec![Value::I32(5), Value::I32(6), Value::I32(7)])
    );
}

#[test]
fn test_pipe_total_limited() {
    init_tracing();
    let codec = pipe_codec("LONG");

    // each chunk fits on its own; together they exceed the limit
    #[rustfmt::skip]
    let wire = vec![
        1, 0, 0, 0, 5, 0, 0, 0,
        2, 0, 0, 0, 6, 0, 0, 0, 7, 0, 0, 0,
        0, 0, 0, 0,
    ];
    let ctx = NdrContext::default().with_max_elements(2);
    let err = codec.from_bytes(wire, ctx).unwrap_err();
    assert!(matches!(
        err,
        MidlError::Ndr(NdrError::AllocationLimitExceeded { requested: 3, limit: 2 })
    ));
}

#[test]
fn test_truncated_chunk() {
    init_tracing();
    let codec = pipe_codec("LONG");

    let err = codec
        .from_bytes(vec![5u8, 0, 0, 0, 1, 0, 0, 0], NdrContext::default())
        .unwrap_err();
    assert!(matches!(
        err,
        MidlError::Ndr(NdrError::BufferOverflow { size: 5, have: 4 })
    ));
}

#[test]
fn test_struct_pipe_round_trip() {
    init_tracing();
    let point = Type::structure(
        "POINT",
        vec![
            midl::Field::new("x", Type::named("LONG")),
            midl::Field::new("y", Type::named("LONG")),
        ],
    );
    let registry = Registry::builder().register_type(point).unwrap().build().unwrap();
    let codec = registry.codec_for(Type::pipe(Type::named("POINT"))).unwrap();

    let points: Vec<Value> = (0..4)
        .map(|i| StructValue::new().with("x", i).with("y", -i).into())
        .collect();
    let bytes = codec
        .to_bytes(&Value::Array(points.clone()), NdrContext::default())
        .unwrap();
    assert_eq!(bytes.len(), 4 + 4 * 8 + 4);

    let decoded = codec.from_bytes(bytes, NdrContext::default()).unwrap();
    assert_eq!(decoded, Value::Array(points));
}
