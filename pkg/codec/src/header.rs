use std::collections::HashMap;
use std::time::Duration;

/// Which of the four message shapes a frame represents. Determines which
/// `Vine-*` header fields a codec should expect/validate (§4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Event,
    Error,
}

/// The codec-neutral envelope (§6). Every message on the wire carries these
/// fields; codecs are responsible for serializing/deserializing them
/// alongside the body in whatever shape is idiomatic for their wire format
/// (JSON object keys, gRPC trailers, etc), but the fields themselves and
/// their names are part of the wire contract and must be preserved as-is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// `Vine-Id`: unique id of this request/response pair.
    pub id: String,
    /// `Vine-Service`: logical service name being called.
    pub service: String,
    /// `Vine-Method`: RPC method name, e.g. `Say.Hello`.
    pub method: String,
    /// `Vine-Endpoint`: matches `method` for unary calls; used to
    /// disambiguate endpoints that share a method name across versions.
    pub endpoint: String,
    /// `Vine-Error`: set on error responses. The sentinel value `"EOS"`
    /// with an empty body signals a clean end-of-stream.
    pub error: Option<String>,
    /// `Vine-Stream`: present iff this socket is carrying a stream, set to
    /// the stream/session id.
    pub stream: Option<String>,
    /// `Content-Type` negotiated for the body.
    pub content_type: String,
    /// `Timeout`: the deadline the caller is willing to wait, in
    /// nanoseconds on the wire; exposed here as a `Duration`.
    pub timeout: Option<Duration>,
    /// Everything else: user-supplied metadata and any additional
    /// `Vine-*` headers not broken out above.
    pub metadata: HashMap<String, String>,
}

pub const EOS: &str = "EOS";

impl Header {
    pub fn is_end_of_stream(&self) -> bool {
        self.error.as_deref() == Some(EOS)
    }

    pub fn end_of_stream(stream: impl Into<String>) -> Self {
        Self {
            error: Some(EOS.to_string()),
            stream: Some(stream.into()),
            ..Default::default()
        }
    }
}
