use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use common::errors::*;

/// A single frame carried over a `Socket`: headers travel natively (the
/// way HTTP/2 carries a HEADERS frame ahead of DATA), the body is whatever
/// bytes a `Codec` produced.
#[derive(Clone, Debug, Default)]
pub struct Message {
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Message {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }
}

/// Options controlling a single `Transport::dial`.
#[derive(Clone, Debug, Default)]
pub struct DialOptions {
    /// Marks this socket as carrying a stream: it will be held open across
    /// many `send`/`recv` pairs instead of being returned to the pool
    /// after one round trip (§4.2, "Streams are opt-in").
    pub stream: bool,

    /// Per-socket deadline. `None` means unbounded, matching the
    /// transport's default.
    pub timeout: Option<Duration>,
}

/// A full-duplex, frame-oriented channel between two endpoints (§4.2).
///
/// `recv` returns `Ok(None)` exactly when the peer has cleanly closed the
/// underlying transport (the `eof` outcome in the spec's failure
/// enumeration); a peer reset, timeout, or malformed frame instead
/// surfaces as `Err` with the matching `Kind`. The *application level*
/// end-of-stream sentinel (`Vine-Error: EOS`) is a `Message` like any
/// other and is interpreted above this layer, by the client/server.
#[async_trait]
pub trait Socket: Send + Sync {
    async fn send(&self, message: Message) -> Result<()>;

    async fn recv(&self) -> Result<Option<Message>>;

    /// Half-closes the send side and/or tears the socket down entirely,
    /// depending on the backend. Idempotent.
    async fn close(&self) -> Result<()>;

    fn remote_address(&self) -> String;
}

#[async_trait]
pub trait Listener: Send + Sync {
    async fn accept(&self) -> Result<Box<dyn Socket>>;

    fn local_address(&self) -> String;
}

/// Provides `Listen(addr) -> Listener` and `Dial(addr, opts) -> Socket`
/// (§4.2). Concrete backends: `InMemoryTransport` (same-process, used in
/// tests and for colocated services) and `TcpTransport` (length-prefixed
/// framing over a real socket). HTTP/2 and QUIC backends plug into the
/// same trait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>>;

    async fn dial(&self, addr: &str, opts: DialOptions) -> Result<Box<dyn Socket>>;
}
