//! Concurrency and volume tests
//!
//! A frozen registry is shared across threads and tasks; every marshal call
//! owns its own referent numbering, so identical inputs give identical bytes
//! no matter how calls interleave.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use integration_tests::{init_tracing, sample_registry};
use futures::future::join_all;
use midl::{NdrContext, StructValue, UnionValue, Value};

fn name_list(seed: usize, count: usize) -> Value {
    let names: Vec<Value> = (0..count)
        .map(|i| {
            StructValue::new()
                .with("Buffer", Value::pointer(format!("name-{seed}-{i}")))
                .into()
        })
        .collect();
    StructValue::new().with("Names", names).into()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_share_codec() {
    init_tracing();
    let registry = sample_registry();
    let codec = registry.codec("NAME_LIST").unwrap();

    let tasks: Vec<_> = (0..64)
        .map(|seed| {
            let codec = codec.clone();
            tokio::spawn(async move {
                let value = name_list(seed, 1 + seed % 7);
                let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();
                let decoded = codec.from_bytes(bytes.clone(), NdrContext::default()).unwrap();
                (seed, bytes, decoded)
            })
        })
        .collect();

    for result in join_all(tasks).await {
        let (seed, bytes, decoded) = result.unwrap();
        let again = codec.to_bytes(&name_list(seed, 1 + seed % 7), NdrContext::default()).unwrap();
        assert_eq!(bytes, again, "seed {seed}");

        let Value::Array(items) = decoded.as_struct().unwrap().get("Names").unwrap() else {
            panic!("Names is not an array");
        };
        assert_eq!(items.len(), 1 + seed % 7);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_codec_lookup() {
    init_tracing();
    let registry = sample_registry();
    let names = ["BLOB", "RPC_UNICODE_STRING", "KEY_RECORD", "NAME_LIST"];

    let tasks: Vec<_> = (0..100)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let name = names[i % names.len()];
            tokio::spawn(async move {
                let codec = registry.codec(name).unwrap();
                let zero = codec.zero_value().unwrap();
                let bytes = codec.to_bytes(&zero, NdrContext::default()).unwrap();
                (name, codec.alignment(false).unwrap(), bytes.len())
            })
        })
        .collect();

    let results: Vec<_> = join_all(tasks).await.into_iter().map(Result::unwrap).collect();
    for name in names {
        let seen: Vec<_> = results
            .iter()
            .filter(|(n, _, _)| *n == name)
            .map(|(_, align, len)| (*align, *len))
            .collect();
        assert!(seen.windows(2).all(|w| w[0] == w[1]), "{name} layout differs");
    }
}

#[test]
fn test_threads_share_layout_cache() {
    init_tracing();
    let registry = sample_registry();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let codec = registry.codec("TAGGED_VALUE").unwrap();
                let mut total = 0usize;
                for i in 0..500u32 {
                    let value: Value = StructValue::new()
                        .with("Kind", 1u32)
                        .with("Value", UnionValue::new("Short", i + t))
                        .into();
                    let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();
                    let decoded = codec.from_bytes(bytes.clone(), NdrContext::default()).unwrap();
                    let arm = decoded.as_struct().unwrap().get("Value").unwrap();
                    assert_eq!(*arm.as_union().unwrap().value, Value::U32(i + t));
                    total += bytes.len();
                }
                total
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 500 * 12);
    }
}

#[test]
fn test_large_array_volume() {
    init_tracing();
    let registry = sample_registry();
    let codec = registry.codec("BLOB").unwrap();

    let data: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    let value: Value = StructValue::new()
        .with("pBlobData", Value::pointer(data.clone()))
        .into();

    let start = Instant::now();
    let bytes = codec.to_bytes(&value, NdrContext::default()).unwrap();
    let decoded = codec.from_bytes(bytes, NdrContext::default()).unwrap();
    tracing::info!("1 MB blob round trip in {:?}", start.elapsed());

    let blob = decoded.as_struct().unwrap();
    assert_eq!(blob.get("cbSize"), Some(&Value::U32(1_000_000)));
    assert_eq!(blob.get("pBlobData"), Some(&Value::pointer(data)));
}
