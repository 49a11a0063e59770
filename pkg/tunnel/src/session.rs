use std::sync::Arc;

use async_std::channel;
use bytes::Bytes;
use common::errors::*;

use crate::model::{Mode, SessionState};
use crate::tunnel::TunnelShared;

/// A logical stream within a tunnel between two endpoints (§3 "Tunnel
/// Session"), created by `Tunnel::dial` or delivered to a
/// `Tunnel::listen_channel` subscriber on an incoming `Open` (§4.9).
///
/// `send`/`recv` wrap payloads as `Frame::Session{sessionId, body}`; the
/// set of links a `send` fans out to is resolved fresh from `Tunnel`'s
/// shared state on every call, so a multicast/broadcast session keeps
/// working after an individual link drops (§7 "Tunnel: on link loss ...
/// multicast/broadcast sessions continue via other links").
pub struct Session {
    pub(crate) tunnel: Arc<TunnelShared>,
    pub(crate) id: String,
    pub(crate) channel: String,
    pub(crate) mode: Mode,
    pub(crate) inbound: channel::Receiver<Bytes>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub async fn state(&self) -> SessionState {
        self.tunnel.session_state(&self.id).await
    }

    pub async fn send(&self, body: Bytes) -> Result<()> {
        self.tunnel.send_on_session(&self.id, &self.channel, body).await
    }

    /// Returns `Ok(None)` once the peer (or every peer, for
    /// multicast/broadcast) has closed — the session's inbound channel is
    /// dropped by `Tunnel` exactly once there is nothing left to deliver.
    pub async fn recv(&self) -> Result<Option<Bytes>> {
        match self.inbound.recv().await {
            Ok(body) => Ok(Some(body)),
            Err(_) => Ok(None),
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.tunnel.close_session(&self.id).await
    }
}
