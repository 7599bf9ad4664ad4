//! Shared fixtures for the end-to-end marshaling tests

use std::sync::{Arc, Once};

use midl::{Field, PointerKind, Primitive, Registry, Type, UnionArm, UnionType};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: Once = Once::new();

/// Install a test subscriber once; `RUST_LOG` overrides the level
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Registry with the types the scenarios share:
///
/// ```text
/// typedef struct { ULONG cbSize; [size_is(cbSize)] BYTE *pBlobData; } BLOB;
/// typedef struct { USHORT Length; USHORT MaximumLength;
///                  [size_is(MaximumLength / 2), length_is(Length / 2)] WCHAR *Buffer;
///                } RPC_UNICODE_STRING;
/// typedef [switch_type(DWORD)] union { [case(1)] DWORD Short; [case(2)] WORD Word;
///                                      [case(6)] ULONGLONG Wide; } VALUE_UNION;
/// typedef struct { DWORD Kind; [switch_is(Kind)] VALUE_UNION Value; } TAGGED_VALUE;
/// typedef struct { GUID Id; BYTE Key[16]; [string] WCHAR Label[8]; } KEY_RECORD;
/// typedef struct { DWORD Count; [size_is(Count)] RPC_UNICODE_STRING Names[]; } NAME_LIST;
/// ```
pub fn sample_registry() -> Arc<Registry> {
    let blob = Type::structure(
        "BLOB",
        vec![
            Field::new("cbSize", Type::named("ULONG")),
            Field::new("pBlobData", Type::pointer(PointerKind::Unique, Type::named("BYTE")))
                .size_is(&["cbSize"])
                .expect("size_is"),
        ],
    );

    let unicode = Type::structure(
        "RPC_UNICODE_STRING",
        vec![
            Field::new("Length", Type::named("USHORT")),
            Field::new("MaximumLength", Type::named("USHORT")),
            Field::new("Buffer", Type::pointer(PointerKind::Unique, Type::named("WCHAR")))
                .size_is(&["MaximumLength / 2"])
                .and_then(|f| f.length_is(&["Length / 2"]))
                .expect("size_is"),
        ],
    );

    let value_union = Type::union(
        "VALUE_UNION",
        UnionType::external(Type::primitive(Primitive::Uint32))
            .arm(UnionArm::case(&[1], Field::new("Short", Type::named("DWORD"))))
            .arm(UnionArm::case(&[2], Field::new("Word", Type::named("WORD"))))
            .arm(UnionArm::case(&[6], Field::new("Wide", Type::named("ULONGLONG")))),
    );

    let tagged = Type::structure(
        "TAGGED_VALUE",
        vec![
            Field::new("Kind", Type::named("DWORD")),
            Field::new("Value", Type::named("VALUE_UNION"))
                .switch_is("Kind")
                .expect("switch_is"),
        ],
    );

    let key_record = Type::structure(
        "KEY_RECORD",
        vec![
            Field::new("Id", Type::named("GUID")),
            Field::new("Key", Type::array(Type::named("BYTE"), 16)),
            Field::new("Label", Type::array(Type::named("WCHAR"), 8)).string(),
        ],
    );

    let name_list = Type::structure(
        "NAME_LIST",
        vec![
            Field::new("Count", Type::named("DWORD")),
            Field::new("Names", Type::conformant(Type::named("RPC_UNICODE_STRING")))
                .size_is(&["Count"])
                .expect("size_is"),
        ],
    );

    let mut builder = Registry::builder();
    for ty in [blob, unicode, value_union, tagged, key_record, name_list] {
        builder = builder.register_type(ty).expect("register");
    }
    builder.build().expect("registry")
}
