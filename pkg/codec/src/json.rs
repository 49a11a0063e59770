use common::errors::*;
use serde_json::Value;

use crate::codec::{Codec, JSON, JSON_RPC};
use crate::framing::{read_frame_header, read_json_body, write_frame, write_json_body};
use crate::header::{Header, MessageKind};

/// `application/json` and `application/json-rpc`: a human readable codec
/// good for debugging and for services that haven't opted into a binary
/// format.
pub struct JsonCodec {
    content_type: &'static str,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self { content_type: JSON }
    }

    pub fn rpc_variant() -> Self {
        Self {
            content_type: JSON_RPC,
        }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        self.content_type
    }

    fn write(&self, header: &Header, body: &Value) -> Result<Vec<u8>> {
        write_frame(header, &write_json_body(body)?)
    }

    fn read_header(&self, data: &[u8], kind: MessageKind) -> Result<(Header, usize)> {
        read_frame_header(data, kind)
    }

    fn read_body(&self, data: &[u8]) -> Result<Value> {
        read_json_body(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_header_and_body() {
        let codec = JsonCodec::new();

        let mut header = Header::default();
        header.id = "req-1".into();
        header.service = "greeter".into();
        header.method = "Say.Hello".into();
        header.endpoint = "Say.Hello".into();
        header.content_type = JSON.into();

        let body = json!({ "name": "world" });

        let frame = codec.write(&header, &body).unwrap();
        let (decoded_header, offset) = codec.read_header(&frame, MessageKind::Request).unwrap();
        let decoded_body = codec.read_body(&frame[offset..]).unwrap();

        assert_eq!(decoded_header.service, "greeter");
        assert_eq!(decoded_header.method, "Say.Hello");
        assert_eq!(decoded_body, body);
    }
}
