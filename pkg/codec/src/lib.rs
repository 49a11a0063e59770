//! Content-type aware encode/decode for RPC messages (§4.1).
//!
//! Pure in-memory: codecs never touch a socket, they only convert between
//! `Header`+`serde_json::Value` and byte frames. `transport` is the layer
//! that actually moves those frames across the wire.

mod binary;
mod codec;
mod framing;
mod grpc;
mod header;
mod json;
mod octet;
mod registry;
mod wire_header;

pub use binary::BinaryCodec;
pub use codec::{
    decode_body, encode_body, rewrite_for_backward_compatibility, Codec, GRPC, GRPC_JSON,
    GRPC_PROTO, JSON, JSON_RPC, OCTET_STREAM, PROTOBUF, PROTO_RPC,
};
pub use grpc::GrpcCodec;
pub use header::{Header, MessageKind, EOS};
pub use json::JsonCodec;
pub use octet::OctetStreamCodec;
pub use registry::{all_standard_content_types, CodecRegistry};
