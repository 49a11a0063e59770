use common::errors::*;
use serde_json::Value;

use crate::header::{Header, MessageKind};
use crate::wire_header::WireHeader;

/// Shared frame shape used by the JSON and binary codecs: a 4-byte
/// big-endian header length, the header encoded as JSON (headers are
/// always small and textual regardless of the body's wire format, the
/// same way HTTP headers stay textual over a binary body), then the body.
pub fn write_frame(header: &Header, body_bytes: &[u8]) -> Result<Vec<u8>> {
    let wire: WireHeader = header.into();
    let header_bytes =
        serde_json::to_vec(&wire).map_err(|e| Error::wrap(Kind::InternalServerError, e))?;

    let mut out = Vec::with_capacity(4 + header_bytes.len() + body_bytes.len());
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(body_bytes);
    Ok(out)
}

pub fn read_frame_header(data: &[u8], kind: MessageKind) -> Result<(Header, usize)> {
    if data.len() < 4 {
        return Err(Error::new(Kind::BadRequest, "frame too short for header length"));
    }

    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let start = 4;
    let end = start
        .checked_add(len)
        .ok_or_else(|| Error::new(Kind::BadRequest, "header length overflow"))?;
    if end > data.len() {
        return Err(Error::new(Kind::BadRequest, "truncated header"));
    }

    let wire: WireHeader = serde_json::from_slice(&data[start..end])
        .map_err(|e| Error::wrap(Kind::BadRequest, e))?;
    let header: Header = wire.into();

    match kind {
        MessageKind::Request => {
            if header.service.is_empty() || header.method.is_empty() {
                return Err(Error::new(
                    Kind::BadRequest,
                    "request frame missing Vine-Service/Vine-Method",
                ));
            }
        }
        MessageKind::Error => {
            if header.error.is_none() {
                return Err(Error::new(Kind::BadRequest, "error frame missing Vine-Error"));
            }
        }
        MessageKind::Response | MessageKind::Event => {}
    }

    Ok((header, end))
}

pub fn write_json_body(body: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| Error::wrap(Kind::InternalServerError, e))
}

pub fn read_json_body(data: &[u8]) -> Result<Value> {
    if data.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(data).map_err(|e| Error::wrap(Kind::BadRequest, e))
}
