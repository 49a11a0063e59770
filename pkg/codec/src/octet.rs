use common::errors::*;
use serde_json::Value;

use crate::codec::{Codec, OCTET_STREAM};
use crate::framing::{read_frame_header, write_frame};
use crate::header::{Header, MessageKind};

/// `application/octet-stream`: raw bytes, no structure assumed. The body
/// value is always `Value::String` holding the bytes base64-encoded, since
/// `Codec::write`/`read_body` operate on `serde_json::Value` uniformly
/// across codecs; callers that want true zero-copy raw bytes should bypass
/// the codec layer and talk to `Transport` directly.
pub struct OctetStreamCodec;

impl Codec for OctetStreamCodec {
    fn content_type(&self) -> &'static str {
        OCTET_STREAM
    }

    fn write(&self, header: &Header, body: &Value) -> Result<Vec<u8>> {
        let raw = match body {
            Value::String(s) => base64::decode(s).map_err(|e| Error::wrap(Kind::BadRequest, e))?,
            Value::Null => Vec::new(),
            _ => return Err(Error::new(Kind::BadRequest, "octet-stream body must be a base64 string")),
        };
        write_frame(header, &raw)
    }

    fn read_header(&self, data: &[u8], kind: MessageKind) -> Result<(Header, usize)> {
        read_frame_header(data, kind)
    }

    fn read_body(&self, data: &[u8]) -> Result<Value> {
        Ok(Value::String(base64::encode(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trips() {
        for input in [&b""[..], b"f", b"fo", b"foo", b"foob", b"fooba", b"foobar"] {
            let encoded = base64::encode(input);
            let decoded = base64::decode(&encoded).unwrap();
            assert_eq!(decoded, input);
        }
    }

    #[test]
    fn codec_round_trips_raw_bytes() {
        let codec = OctetStreamCodec;
        let mut header = Header::default();
        header.service = "blob".into();
        header.method = "Get".into();

        let raw = vec![0u8, 1, 2, 255, 254, 10];
        let body = Value::String(base64::encode(&raw));

        let frame = codec.write(&header, &body).unwrap();
        let (_, offset) = codec.read_header(&frame, MessageKind::Request).unwrap();
        let decoded = codec.read_body(&frame[offset..]).unwrap();

        assert_eq!(decoded, body);
    }
}
