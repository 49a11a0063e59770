use common::errors::*;
use serde_json::Value;

use crate::header::{Header, MessageKind};

/// Bidirectional conversion between an in-memory message value and a byte
/// frame, for one named content-type (§4.1).
///
/// The in-memory representation is `serde_json::Value` rather than a
/// generic `T: Serialize`, so that `Codec` stays object-safe: the registry
/// looks codecs up dynamically by content-type string at dispatch time
/// (mirrors `Content-Type` sniffing in the teacher's `http` crate), and
/// handlers convert `Value` to/from their own typed request/response
/// structs with `serde_json::from_value`/`to_value` at the boundary.
pub trait Codec: Send + Sync {
    /// The content-type this codec is registered under, e.g.
    /// `application/json`.
    fn content_type(&self) -> &'static str;

    /// Encodes `header` and `body` into a single wire frame.
    fn write(&self, header: &Header, body: &Value) -> Result<Vec<u8>>;

    /// Parses just the header portion of `data`, along with the byte
    /// offset at which the body begins. `kind` tells the codec which
    /// fields are mandatory for validation purposes.
    fn read_header(&self, data: &[u8], kind: MessageKind) -> Result<(Header, usize)>;

    /// Parses the body starting at the offset returned by `read_header`.
    fn read_body(&self, data: &[u8]) -> Result<Value>;
}

/// Registered content-types, minimum set required by §4.1.
pub const JSON: &str = "application/json";
pub const PROTOBUF: &str = "application/protobuf";
pub const GRPC: &str = "application/grpc";
pub const GRPC_JSON: &str = "application/grpc+json";
pub const GRPC_PROTO: &str = "application/grpc+proto";
pub const JSON_RPC: &str = "application/json-rpc";
pub const PROTO_RPC: &str = "application/proto-rpc";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Rewrites a bare `application/json`/`application/protobuf` content-type
/// to its `-rpc` variant.
///
/// Part of the wire contract (§4.1): nodes that don't advertise a
/// `protocol` in their registry metadata are assumed to speak the older,
/// non-gRPC-wrapped dialect, so the client rewrites for backward
/// compatibility before dialing.
pub fn rewrite_for_backward_compatibility(content_type: &str, node_protocol: Option<&str>) -> String {
    if node_protocol.is_some() {
        return content_type.to_string();
    }

    match content_type {
        JSON => JSON_RPC.to_string(),
        PROTOBUF => PROTO_RPC.to_string(),
        other => other.to_string(),
    }
}

/// Encodes just a body value through `codec`, for transports (HTTP/2,
/// in-memory) that carry headers natively and only need the codec for the
/// body portion. Implemented by running the codec's normal header+body
/// framing with an empty header and slicing the header back off, so every
/// codec only has to implement the combined `write`/`read_header` contract
/// from §4.1 once.
pub fn encode_body(codec: &dyn Codec, body: &Value) -> Result<Vec<u8>> {
    let framed = codec.write(&Header::default(), body)?;
    let (_, offset) = codec.read_header(&framed, MessageKind::Event)?;
    Ok(framed[offset..].to_vec())
}

pub fn decode_body(codec: &dyn Codec, body_bytes: &[u8]) -> Result<Value> {
    codec.read_body(body_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_bare_content_types_when_node_has_no_protocol() {
        assert_eq!(rewrite_for_backward_compatibility(JSON, None), JSON_RPC);
        assert_eq!(
            rewrite_for_backward_compatibility(PROTOBUF, None),
            PROTO_RPC
        );
        assert_eq!(rewrite_for_backward_compatibility(GRPC, None), GRPC);
    }

    #[test]
    fn leaves_content_type_alone_when_node_advertises_a_protocol() {
        assert_eq!(
            rewrite_for_backward_compatibility(JSON, Some("grpc")),
            JSON
        );
    }
}
