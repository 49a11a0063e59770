use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use codec::{decode_body, encode_body, Codec, JsonCodec};
use common::errors::*;
use serde::{Deserialize, Serialize};
use transport::{DialOptions, Listener, Socket, Transport};

use crate::broker::{Broker, Subscriber};
use crate::memory::MemoryBroker;
use crate::message::Message;

const METHOD_PUBLISH: &str = "Publish";
const METHOD_SUBSCRIBE: &str = "Subscribe";

#[derive(Serialize, Deserialize)]
struct WireMessage {
    topic: String,
    metadata: HashMap<String, String>,
    body: Vec<u8>,
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        Self {
            topic: m.topic.clone(),
            metadata: m.metadata.clone(),
            body: m.body.to_vec(),
        }
    }
}

impl From<WireMessage> for Message {
    fn from(w: WireMessage) -> Self {
        Self {
            topic: w.topic,
            metadata: w.metadata,
            body: w.body.into(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PublishRequest {
    topic: String,
    message: WireMessage,
}

#[derive(Serialize, Deserialize)]
struct SubscribeRequest {
    topic: String,
    queue: Option<String>,
}

fn transport_message(codec: &dyn Codec, headers: HashMap<String, String>, value: &serde_json::Value) -> Result<transport::Message> {
    let mut headers = headers;
    headers.insert("Content-Type".to_string(), codec.content_type().to_string());
    Ok(transport::Message {
        headers,
        body: encode_body(codec, value)?.into(),
    })
}

/// `Broker` that publishes/subscribes over the same `transport` + `codec`
/// stack the RPC layer uses (§4.10), so callers can swap a `MemoryBroker`
/// for a remote one without changing call sites — the same relationship
/// `NetworkRegistry` has to `MemoryRegistry`.
pub struct HttpBroker {
    transport: Arc<dyn Transport>,
    address: String,
    codec: Arc<dyn Codec>,
}

impl HttpBroker {
    pub fn new(transport: Arc<dyn Transport>, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
            codec: Arc::new(JsonCodec::new()),
        }
    }
}

#[async_trait]
impl Broker for HttpBroker {
    async fn publish(&self, topic: &str, message: Message) -> Result<()> {
        let socket = self
            .transport
            .dial(&self.address, DialOptions::default())
            .await?;

        let req = PublishRequest {
            topic: topic.to_string(),
            message: (&message).into(),
        };
        let mut headers = HashMap::new();
        headers.insert("Vine-Method".to_string(), METHOD_PUBLISH.to_string());
        socket
            .send(transport_message(
                self.codec.as_ref(),
                headers,
                &serde_json::to_value(req).unwrap(),
            )?)
            .await?;

        // Publish is fire-and-forget over a fresh socket; the reply is a
        // bare ack so callers can still observe a transport-level failure.
        socket.recv().await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, queue: Option<&str>) -> Result<Box<dyn Subscriber>> {
        let socket = self
            .transport
            .dial(
                &self.address,
                DialOptions {
                    stream: true,
                    timeout: None,
                },
            )
            .await?;

        let req = SubscribeRequest {
            topic: topic.to_string(),
            queue: queue.map(String::from),
        };
        let mut headers = HashMap::new();
        headers.insert("Vine-Method".to_string(), METHOD_SUBSCRIBE.to_string());
        socket
            .send(transport_message(
                self.codec.as_ref(),
                headers,
                &serde_json::to_value(req).unwrap(),
            )?)
            .await?;

        Ok(Box::new(HttpSubscriber {
            socket,
            codec: self.codec.clone(),
        }))
    }
}

struct HttpSubscriber {
    socket: Box<dyn Socket>,
    codec: Arc<dyn Codec>,
}

#[async_trait]
impl Subscriber for HttpSubscriber {
    async fn next(&self) -> Result<Option<Message>> {
        let message = match self.socket.recv().await? {
            Some(m) => m,
            None => return Ok(None),
        };
        let value = decode_body(self.codec.as_ref(), &message.body)?;
        let wire: WireMessage = serde_json::from_value(value).map_err(|e| Error::wrap(Kind::BadRequest, e))?;
        Ok(Some(wire.into()))
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.socket.close().await
    }
}

/// Server side of `HttpBroker`'s wire protocol, delegating to a locally
/// owned `MemoryBroker`.
pub struct HttpBrokerServer {
    backing: Arc<MemoryBroker>,
    codec: Arc<dyn Codec>,
}

impl HttpBrokerServer {
    pub fn new(backing: Arc<MemoryBroker>) -> Self {
        Self {
            backing,
            codec: Arc::new(JsonCodec::new()),
        }
    }

    pub async fn serve(&self, listener: &dyn Listener) -> Result<()> {
        loop {
            let socket = listener.accept().await?;
            let backing = self.backing.clone();
            let codec = self.codec.clone();
            common::async_std::task::spawn(async move {
                if let Err(e) = Self::handle_connection(backing, codec, socket).await {
                    eprintln!("broker connection failed: {}", e);
                }
            });
        }
    }

    async fn handle_connection(backing: Arc<MemoryBroker>, codec: Arc<dyn Codec>, socket: Box<dyn Socket>) -> Result<()> {
        let request = match socket.recv().await? {
            Some(m) => m,
            None => return Ok(()),
        };

        let method = request
            .header("Vine-Method")
            .ok_or_else(|| Error::new(Kind::BadRequest, "missing Vine-Method header"))?
            .to_string();

        match method.as_str() {
            METHOD_PUBLISH => {
                let value = decode_body(codec.as_ref(), &request.body)?;
                let req: PublishRequest = serde_json::from_value(value).map_err(|e| Error::wrap(Kind::BadRequest, e))?;
                backing.publish(&req.topic, req.message.into()).await?;

                let mut headers = HashMap::new();
                headers.insert("Content-Type".to_string(), codec.content_type().to_string());
                socket
                    .send(transport::Message {
                        headers,
                        body: encode_body(codec.as_ref(), &serde_json::Value::Null)?.into(),
                    })
                    .await
            }
            METHOD_SUBSCRIBE => {
                let value = decode_body(codec.as_ref(), &request.body)?;
                let req: SubscribeRequest = serde_json::from_value(value).map_err(|e| Error::wrap(Kind::BadRequest, e))?;
                let subscriber = backing.subscribe(&req.topic, req.queue.as_deref()).await?;

                loop {
                    let message = match subscriber.next().await? {
                        Some(m) => m,
                        None => return Ok(()),
                    };
                    let wire: WireMessage = (&message).into();
                    let mut headers = HashMap::new();
                    headers.insert("Content-Type".to_string(), codec.content_type().to_string());
                    socket
                        .send(transport::Message {
                            headers,
                            body: encode_body(codec.as_ref(), &serde_json::to_value(wire).unwrap())?.into(),
                        })
                        .await?;
                }
            }
            other => Err(Error::new(Kind::BadRequest, format!("unknown broker method {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::InMemoryTransport;

    #[async_std::test]
    async fn publish_and_subscribe_round_trip_over_the_wire() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let listener = transport.listen("svc://broker").await.unwrap();

        let backing = Arc::new(MemoryBroker::new());
        let server = Arc::new(HttpBrokerServer::new(backing));
        let server_clone = server.clone();
        let _serve_task = common::task::ChildTask::spawn(async move {
            let _ = server_clone.serve(listener.as_ref()).await;
        });

        let broker = HttpBroker::new(transport.clone(), "svc://broker");
        let subscriber = broker.subscribe("events", None).await.unwrap();

        // give the server time to register the subscription before publishing
        async_std::task::sleep(std::time::Duration::from_millis(20)).await;

        broker
            .publish(
                "events",
                Message {
                    topic: "events".to_string(),
                    metadata: HashMap::new(),
                    body: bytes::Bytes::from_static(b"hello"),
                },
            )
            .await
            .unwrap();

        let got = subscriber.next().await.unwrap().unwrap();
        assert_eq!(got.body.as_ref(), b"hello");
    }
}
