use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// How many peers receive each `Session::send` (§4.9 "Sessions").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Exactly one peer receives each message; delivery order preserved;
    /// requires the destination to have accepted via `Listen(channel)`.
    Unicast,
    /// All peers subscribed to the channel receive each message; no
    /// ordering across peers.
    Multicast,
    /// Every reachable peer in the mesh receives, including those that
    /// did not listen.
    Broadcast,
}

/// `Init → OpenSent → (Accepted | TimedOut) → Established → (Closing |
/// TransportLost) → Closed` (§4.9 "Session state machine").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Init,
    OpenSent,
    Established,
    Closing,
    TimedOut,
    TransportLost,
    Closed,
}

/// Why a session was closed, carried on `Frame::Close` (§4.9
/// "Authentication").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    Normal,
    Denied,
    LinkLost,
}

/// The tunnel wire protocol (§3 "Tunnel Session", §6 "Tunnel protocol"):
/// `Open`, `Accept`, `Close`, `Session{data}`, `Keepalive`, `Discover`,
/// `Announce`, each carrying `{tunnelId, channel, sessionId, token}` as
/// needed. Serialized as a single tagged JSON value per frame — the
/// tunnel has no need for a dedicated binary wire format since it already
/// rides on a framed `transport::Socket`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "frame")]
pub enum Frame {
    Open {
        tunnel_id: String,
        channel: String,
        session_id: String,
        mode: Mode,
        token: String,
    },
    Accept {
        tunnel_id: String,
        session_id: String,
    },
    Close {
        tunnel_id: String,
        session_id: String,
        reason: CloseReason,
    },
    Session {
        tunnel_id: String,
        session_id: String,
        channel: String,
        #[serde(with = "bytes_as_vec")]
        body: Bytes,
    },
    Keepalive {
        tunnel_id: String,
    },
    Discover {
        tunnel_id: String,
    },
    /// Route advertisement solicited by `Discover` (§4.9 "Links"). The
    /// payload is left as an opaque JSON blob here: the `network` crate
    /// (which does know about `router::Advert`) is responsible for
    /// filling it in and interpreting it, keeping this crate free of a
    /// dependency on `router`.
    Announce {
        tunnel_id: String,
        payload: serde_json::Value,
    },
}

impl Frame {
    pub fn tunnel_id(&self) -> &str {
        match self {
            Frame::Open { tunnel_id, .. }
            | Frame::Accept { tunnel_id, .. }
            | Frame::Close { tunnel_id, .. }
            | Frame::Session { tunnel_id, .. }
            | Frame::Keepalive { tunnel_id }
            | Frame::Discover { tunnel_id }
            | Frame::Announce { tunnel_id, .. } => tunnel_id,
        }
    }
}

mod bytes_as_vec {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let v = Vec::<u8>::deserialize(d)?;
        Ok(Bytes::from(v))
    }
}

/// A process-unique session/request id, monotonically increasing (mirrors
/// `client`'s own request-id generator).
pub fn new_id(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{:x}", prefix, n)
}
