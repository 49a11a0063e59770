use common::errors::*;
use serde_json::Value;

use crate::codec::{Codec, PROTOBUF, PROTO_RPC};
use crate::framing::{read_frame_header, write_frame};
use crate::header::{Header, MessageKind};

/// `application/protobuf` and `application/proto-rpc`.
///
/// This workspace doesn't carry the teacher's own protobuf compiler and
/// runtime (`pkg/protobuf*`), so the body is encoded with `bincode` instead
/// of real protobuf wire bytes. The codec still satisfies the same
/// contract (a distinct, denser binary content-type alongside JSON) and is
/// swappable for a real protobuf codec without touching any caller code,
/// since callers only ever see `Codec`.
pub struct BinaryCodec {
    content_type: &'static str,
}

impl BinaryCodec {
    pub fn new() -> Self {
        Self {
            content_type: PROTOBUF,
        }
    }

    pub fn rpc_variant() -> Self {
        Self {
            content_type: PROTO_RPC,
        }
    }
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for BinaryCodec {
    fn content_type(&self) -> &'static str {
        self.content_type
    }

    fn write(&self, header: &Header, body: &Value) -> Result<Vec<u8>> {
        let body_bytes =
            bincode::serialize(body).map_err(|e| Error::wrap(Kind::InternalServerError, e))?;
        write_frame(header, &body_bytes)
    }

    fn read_header(&self, data: &[u8], kind: MessageKind) -> Result<(Header, usize)> {
        read_frame_header(data, kind)
    }

    fn read_body(&self, data: &[u8]) -> Result<Value> {
        if data.is_empty() {
            return Ok(Value::Null);
        }
        bincode::deserialize(data).map_err(|e| Error::wrap(Kind::BadRequest, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_header_and_body() {
        let codec = BinaryCodec::new();

        let mut header = Header::default();
        header.id = "req-1".into();
        header.service = "greeter".into();
        header.method = "Say.Hello".into();
        header.content_type = PROTOBUF.into();

        let body = json!({ "name": "world", "count": 3 });

        let frame = codec.write(&header, &body).unwrap();
        let (decoded_header, offset) = codec.read_header(&frame, MessageKind::Request).unwrap();
        let decoded_body = codec.read_body(&frame[offset..]).unwrap();

        assert_eq!(decoded_header.service, "greeter");
        assert_eq!(decoded_body, body);
    }
}
