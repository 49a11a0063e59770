use std::collections::HashMap;
use std::sync::Arc;

use common::errors::*;

use crate::binary::BinaryCodec;
use crate::codec::{Codec, GRPC, GRPC_JSON, GRPC_PROTO, JSON, JSON_RPC, OCTET_STREAM, PROTOBUF, PROTO_RPC};
use crate::grpc::GrpcCodec;
use crate::json::JsonCodec;
use crate::octet::OctetStreamCodec;

/// An explicit, inspectable set of registered codecs, keyed by
/// content-type.
///
/// Per the framework's plugin-registration design note: the set of enabled
/// codecs is collected once at process start (typically via
/// `CodecRegistry::standard()` plus any `register()` calls the operator
/// wants) rather than assembled implicitly by module side effects.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// The minimum set of content-types required by §4.1.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JsonCodec::new()));
        registry.register(Arc::new(JsonCodec::rpc_variant()));
        registry.register(Arc::new(BinaryCodec::new()));
        registry.register(Arc::new(BinaryCodec::rpc_variant()));
        registry.register(Arc::new(GrpcCodec::proto()));
        registry.register(Arc::new(GrpcCodec::proto_variant()));
        registry.register(Arc::new(GrpcCodec::json()));
        registry.register(Arc::new(OctetStreamCodec));
        registry
    }

    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.insert(codec.content_type(), codec);
    }

    pub fn get(&self, content_type: &str) -> Result<Arc<dyn Codec>> {
        self.codecs
            .get(content_type)
            .cloned()
            .ok_or_else(|| Error::new(Kind::BadRequest, format!("no codec registered for {}", content_type)))
    }

    pub fn content_types(&self) -> Vec<&'static str> {
        self.codecs.keys().copied().collect()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Re-exported so callers don't need to depend on every concrete codec
/// module just to build a custom registry.
pub fn all_standard_content_types() -> &'static [&'static str] {
    &[
        JSON,
        JSON_RPC,
        PROTOBUF,
        PROTO_RPC,
        GRPC,
        GRPC_PROTO,
        GRPC_JSON,
        OCTET_STREAM,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_mandated_content_type() {
        let registry = CodecRegistry::standard();
        for content_type in all_standard_content_types() {
            assert!(registry.get(content_type).is_ok(), "missing {}", content_type);
        }
    }

    #[test]
    fn unknown_content_type_is_bad_request() {
        let registry = CodecRegistry::standard();
        let err = registry.get("application/xml").unwrap_err();
        assert_eq!(err.kind(), Kind::BadRequest);
    }
}
