use std::collections::HashMap;
use std::sync::Arc;

use codec::{decode_body, encode_body, Codec};
use common::errors::*;
use serde_json::Value;
use transport::{Message, Socket};

/// The server side of a streaming call (§4.6 step 1, §4.5 "Streaming").
/// Mirrors `client::Stream` but is handed to a `StreamHandler` already
/// attached to the socket that opened it; the handler owns its lifetime
/// and is responsible for calling `close` when done.
pub struct ServerStream {
    socket: Arc<dyn Socket>,
    codec: Arc<dyn Codec>,
    service: String,
    method: String,
    stream_id: String,
}

impl ServerStream {
    pub(crate) fn new(
        socket: Arc<dyn Socket>,
        codec: Arc<dyn Codec>,
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
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub async fn send(&self, body: Value) -> Result<()> {
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

    /// Returns `Ok(None)` once the peer's `EOS` sentinel is observed or
    /// the socket is closed.
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

        decode_body(self.codec.as_ref(), &message.body).map(Some)
    }

    /// Writes the `EOS` terminator (§4.6 step 5) and closes the socket.
    pub async fn close(&self) -> Result<()> {
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
