use std::collections::HashMap;

use codec::{decode_body, encode_body, Codec};
use common::errors::*;
use serde_json::Value;
use transport::{Message, Socket};

/// A long-lived request/response socket returned by `Client::stream`
/// (§4.5 "Streaming"). `send`/`recv` exchange one body value per call;
/// `close` sends the `EOS` sentinel and lets the caller drop the socket
/// afterwards (never returned to the pool — a streamed socket belongs to
/// the stream for its whole lifetime).
pub struct Stream {
    socket: Box<dyn Socket>,
    codec: std::sync::Arc<dyn Codec>,
    service: String,
    method: String,
    stream_id: String,
    closed: bool,
}

impl Stream {
    pub(crate) fn new(
        socket: Box<dyn Socket>,
        codec: std::sync::Arc<dyn Codec>,
        service: String,
        method: String,
        stream_id: String,
    ) -> Self {
        Self {
            socket,
            codec,
            service,
            method,
            stream_id,
            closed: false,
        }
    }

    pub async fn send(&self, body: Value) -> Result<()> {
        if self.closed {
            return Err(Error::new(Kind::Shutdown, "stream is closed"));
        }

        let mut headers = HashMap::new();
        headers.insert("Vine-Service".to_string(), self.service.clone());
        headers.insert("Vine-Method".to_string(), self.method.clone());
        headers.insert("Vine-Stream".to_string(), self.stream_id.clone());
        headers.insert("Content-Type".to_string(), self.codec.content_type().to_string());

        self.socket
            .send(Message {
                headers,
                body: encode_body(self.codec.as_ref(), &body)?.into(),
            })
            .await
    }

    /// Returns `Ok(None)` once the peer's `EOS` sentinel is observed,
    /// translating it out of the header layer per §4.5.
    pub async fn recv(&self) -> Result<Option<Value>> {
        let message = match self.socket.recv().await? {
            Some(m) => m,
            None => return Ok(None),
        };

        if message.header("Vine-Error") == Some(codec::EOS) {
            return Ok(None);
        }
        if let Some(err) = message.header("Vine-Error") {
            return Err(Error::new(Kind::InternalServerError, err.to_string()));
        }

        decode_body(self.codec.as_ref(), &message.body)
    }

    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut headers = HashMap::new();
        headers.insert("Vine-Stream".to_string(), self.stream_id.clone());
        headers.insert("Vine-Error".to_string(), codec::EOS.to_string());

        self.socket
            .send(Message {
                headers,
                body: encode_body(self.codec.as_ref(), &Value::Null)?.into(),
            })
            .await?;
        self.socket.close().await
    }
}
