use std::collections::HashMap;
use std::sync::Arc;

use codec::{decode_body, encode_body, Codec, JsonCodec};
use common::errors::*;
use transport::{DialOptions, Listener, Message, Socket, Transport};

use crate::model::Advert;
use crate::router::Router;

/// `Vine-Method` carried on the router peer protocol (§6 "Router
/// protocol"): peer routers exchange `Advert` messages "carried as
/// regular pub/sub or direct RPC, encoded with the standard codec" — this
/// is the direct-RPC variant, grounded on `registry::network`'s
/// dial-a-socket-per-call shape.
const METHOD_ADVERT: &str = "Advert";

/// Dials a peer router and pushes one `Advert` per call (§4.8 "Peer
/// adverts"). A real deployment holds one `PeerClient` per configured
/// peer and feeds it from `Router::advertise`'s stream.
pub struct PeerClient {
    transport: Arc<dyn Transport>,
    address: String,
    codec: Arc<dyn Codec>,
}

impl PeerClient {
    pub fn new(transport: Arc<dyn Transport>, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
            codec: Arc::new(JsonCodec::new()),
        }
    }

    pub async fn send_advert(&self, advert: &Advert) -> Result<()> {
        let socket = self.transport.dial(&self.address, DialOptions::default()).await?;

        let mut headers = HashMap::new();
        headers.insert("Vine-Method".to_string(), METHOD_ADVERT.to_string());
        headers.insert("Content-Type".to_string(), self.codec.content_type().to_string());

        let value = serde_json::to_value(advert).map_err(|e| Error::wrap(Kind::BadRequest, e))?;
        socket
            .send(Message {
                headers,
                body: encode_body(self.codec.as_ref(), &value)?.into(),
            })
            .await
    }
}

/// Accepts inbound peer adverts and applies each one to a local `Router`
/// (§4.8 "Peer adverts"). Mirrors `registry::NetworkRegistryServer`'s
/// accept-loop shape.
pub struct PeerServer<R: Router> {
    router: Arc<R>,
    codec: Arc<dyn Codec>,
}

impl<R: Router + 'static> PeerServer<R> {
    pub fn new(router: Arc<R>) -> Self {
        Self {
            router,
            codec: Arc::new(JsonCodec::new()),
        }
    }

    pub async fn serve(&self, listener: &dyn Listener) -> Result<()> {
        loop {
            let socket = listener.accept().await?;
            let router = self.router.clone();
            let codec = self.codec.clone();
            common::async_std::task::spawn(async move {
                if let Err(e) = Self::handle_connection(router, codec, socket).await {
                    eprintln!("[router::peer] connection failed: {}", e);
                }
            });
        }
    }

    async fn handle_connection(router: Arc<R>, codec: Arc<dyn Codec>, socket: Box<dyn Socket>) -> Result<()> {
        let request = match socket.recv().await? {
            Some(m) => m,
            None => return Ok(()),
        };

        let method = request.header("Vine-Method").unwrap_or("");
        if method != METHOD_ADVERT {
            return Err(Error::new(Kind::BadRequest, format!("unknown router peer method {}", method)));
        }

        let value = decode_body(codec.as_ref(), &request.body)?;
        let advert: Advert = serde_json::from_value(value).map_err(|e| Error::wrap(Kind::BadRequest, e))?;
        router.process_advert(advert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{now_millis, AdvertType, Event, EventType, Query, Route};
    use crate::router::DefaultRouter;
    use registry::MemoryRegistry;
    use transport::InMemoryTransport;

    #[async_std::test]
    async fn advert_sent_by_peer_client_is_applied_by_peer_server() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let listener = transport.listen("svc://router-peer").await.unwrap();

        let registry = Arc::new(MemoryRegistry::new());
        let router = Arc::new(DefaultRouter::new("r2", "default", registry));
        let server = Arc::new(PeerServer::new(router.clone()));
        let server_clone = server.clone();
        let _serve_task = common::task::ChildTask::spawn(async move {
            let _ = server_clone.serve(listener.as_ref()).await;
        });

        let client = PeerClient::new(transport, "svc://router-peer");
        let route = Route {
            service: "foo.bar".to_string(),
            address: "10.0.0.1:8080".to_string(),
            gateway: String::new(),
            network: "default".to_string(),
            router: "r1".to_string(),
            link: "peer-r1".to_string(),
            metric: 5,
        };
        let advert = Advert {
            id: "r1".to_string(),
            kind: AdvertType::RouteUpdate,
            ttl_ms: 1000,
            timestamp: now_millis(),
            events: vec![Event {
                kind: EventType::Create,
                timestamp: now_millis(),
                route,
            }],
        };
        client.send_advert(&advert).await.unwrap();

        // give the spawned handler a chance to apply the advert
        async_std::task::sleep(std::time::Duration::from_millis(50)).await;

        let routes = router.lookup("foo.bar", Query::default()).await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].router, "r1");
    }
}
