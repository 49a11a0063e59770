use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_std::sync::Mutex;
use common::errors::*;
use transport::{Message, Socket};

use crate::model::Frame;

/// A point-to-point transport connection to one peer tunnel (§3 "Tunnel
/// Session" / §4.9 "Links"). Multiple `Session`s (of any mode) can be
/// multiplexed over one `Link`; `Tunnel` is the only owner, `Session`s
/// only ever see a `link_id` and look the `Link` up through `Tunnel`.
pub(crate) struct Link {
    pub id: String,
    socket: Box<dyn Socket>,
    pub last_heartbeat: Mutex<Instant>,
    pub denied_until: Mutex<Option<Instant>>,
    closed: AtomicBool,
}

impl Link {
    pub fn new(id: String, socket: Box<dyn Socket>) -> Self {
        Self {
            id,
            socket,
            last_heartbeat: Mutex::new(Instant::now()),
            denied_until: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let body = serde_json::to_vec(frame).map_err(|e| Error::wrap(Kind::InternalServerError, e))?;
        self.socket
            .send(Message {
                headers: Default::default(),
                body: body.into(),
            })
            .await
    }

    pub async fn recv(&self) -> Result<Option<Frame>> {
        let message = match self.socket.recv().await? {
            Some(m) => m,
            None => return Ok(None),
        };
        let frame: Frame = serde_json::from_slice(&message.body).map_err(|e| Error::wrap(Kind::BadRequest, e))?;
        Ok(Some(frame))
    }

    pub async fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock().await = Instant::now();
    }

    pub async fn is_denied(&self) -> bool {
        matches!(*self.denied_until.lock().await, Some(t) if t > Instant::now())
    }

    pub async fn deny_for(&self, backoff: std::time::Duration) {
        *self.denied_until.lock().await = Some(Instant::now() + backoff);
    }

    pub async fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.socket.close().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn remote_address(&self) -> String {
        self.socket.remote_address()
    }
}
