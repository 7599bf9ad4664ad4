//! Marshaling of dynamic values
//!
//! A [`TypeCodec`] binds a type to the registry it was declared in and
//! turns [`Value`]s into NDR bytes and back. Codecs are cheap to clone and
//! hold no per-call state: every call builds its own encoder or decoder, so
//! one codec can serve any number of threads at once.
//!
//! Marshaling runs in two steps. The value is first prepared on a private
//! copy (size fields derived, defaults applied, ranges checked), then
//! written in a single pass with embedded pointer referents deferred to the
//! end of the top-level value.

mod decode;
mod encode;
mod prepare;
mod zero;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use midl_ndr::{NdrContext, NdrRead, NdrReader, NdrWrite, NdrWriter};
use tracing::debug;

use crate::error::Result;
use crate::ndr_layout::NdrLayout;
use crate::registry::Registry;
use crate::scopes::{ScopeKind, Scopes};
use crate::types::TypeRef;
use crate::value::Value;

use decode::Decoder;
use encode::Encoder;

pub use zero::zero_value;

/// Integer values of the sibling fields an expression may reference
pub(crate) type Env = Arc<HashMap<String, i64>>;

pub(crate) static VOID: Value = Value::Void;

/// Encoder/decoder for one type
#[derive(Debug, Clone)]
pub struct TypeCodec {
    registry: Arc<Registry>,
    ty: TypeRef,
    scopes: Scopes,
}

impl TypeCodec {
    pub(crate) fn new(registry: Arc<Registry>, ty: TypeRef) -> Result<Self> {
        let scopes = registry.scopes(&ty)?;
        Ok(Self { registry, ty, scopes })
    }

    pub fn name(&self) -> String {
        self.scopes.name()
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Alignment the value needs at its start
    pub fn alignment(&self, ndr64: bool) -> Result<usize> {
        self.scopes.alignment(&self.registry, ndr64)
    }

    /// Layout of a struct or union type
    pub fn layout(&self, ndr64: bool) -> Result<Option<NdrLayout>> {
        match self.scopes.kind() {
            ScopeKind::Struct | ScopeKind::Union => Ok(Some(NdrLayout::for_type(
                &self.registry,
                self.scopes.ty(),
                ndr64,
            )?)),
            _ => Ok(None),
        }
    }

    /// Canonical zero value of the type
    pub fn zero_value(&self) -> Result<Value> {
        zero_value(&self.registry, &self.scopes)
    }

    /// Encode `value`, referents included
    pub fn marshal<W: NdrWrite + ?Sized>(&self, value: &Value, w: &mut W) -> Result<()> {
        debug!("marshaling {} at offset {}", self.name(), w.position());
        let mut value = value.clone();
        prepare::prepare(&self.registry, &self.scopes, &mut value)?;

        let mut encoder = Encoder::new(&self.registry, w);
        encoder.encode_top(&self.scopes, &value)?;
        encoder.flush_deferred()
    }

    /// Decode one value, referents included
    pub fn unmarshal<R: NdrRead + ?Sized>(&self, r: &mut R) -> Result<Value> {
        debug!("unmarshaling {} at offset {}", self.name(), r.position());
        Decoder::new(&self.registry, r).decode_top(&self.scopes)
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self, value: &Value, ctx: NdrContext) -> Result<Bytes> {
        let mut w = NdrWriter::new(ctx);
        self.marshal(value, &mut w)?;
        Ok(w.into_bytes())
    }

    /// Decode from the start of `data`
    pub fn from_bytes(&self, data: impl Into<Bytes>, ctx: NdrContext) -> Result<Value> {
        let mut r = NdrReader::new(data, ctx);
        self.unmarshal(&mut r)
    }
}
