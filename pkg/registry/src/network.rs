use std::sync::Arc;

use async_trait::async_trait;
use codec::{decode_body, encode_body, Codec, JsonCodec};
use common::errors::*;
use serde::{Deserialize, Serialize};
use transport::{DialOptions, Listener, Message, Socket, Transport};

use crate::model::{Action, RegisterOptions, Service, WatchEvent};
use crate::registry::{Registry, Watch};

/// `Vine-Method` values for the registry's wire protocol (§6 "Registry
/// protocol"): `Register/Deregister/GetService/ListServices/Watch` carried
/// as regular request/response frames over a `Transport` + `Codec`,
/// standing in for the full gRPC service the spec names (no client/server
/// RPC stack is assumed here; the network registry dials its own sockets
/// directly).
const METHOD_REGISTER: &str = "Register";
const METHOD_DEREGISTER: &str = "Deregister";
const METHOD_GET_SERVICE: &str = "GetService";
const METHOD_LIST_SERVICES: &str = "ListServices";
const METHOD_WATCH: &str = "Watch";

#[derive(Serialize, Deserialize)]
struct RegisterRequest {
    domain: String,
    service: Service,
    ttl_secs: u64,
}

#[derive(Serialize, Deserialize)]
struct DeregisterRequest {
    domain: String,
    service: Service,
}

#[derive(Serialize, Deserialize)]
struct GetServiceRequest {
    domain: String,
    name: String,
}

#[derive(Serialize, Deserialize)]
struct ListServicesRequest {
    domain: String,
}

#[derive(Serialize, Deserialize)]
struct WatchRequest {
    domain: String,
    service_filter: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    message: String,
}

fn request_message(method: &str, codec: &dyn Codec, body: &serde_json::Value) -> Result<Message> {
    let mut headers = std::collections::HashMap::new();
    headers.insert("Vine-Method".to_string(), method.to_string());
    headers.insert("Content-Type".to_string(), codec.content_type().to_string());
    Ok(Message {
        headers,
        body: encode_body(codec, body)?.into(),
    })
}

fn error_from_message(message: &Message) -> Option<Error> {
    let kind_str = message.header("Vine-Error")?;
    if kind_str == codec::EOS {
        return None;
    }
    Some(Error::new(kind_from_str(kind_str), kind_str.to_string()))
}

fn kind_from_str(s: &str) -> Kind {
    match s {
        "bad_request" => Kind::BadRequest,
        "not_found" => Kind::NotFound,
        "timeout" => Kind::Timeout,
        "unauthorized" => Kind::Unauthorized,
        "forbidden" => Kind::Forbidden,
        "watcher_stopped" => Kind::WatcherStopped,
        "duplicate_route" => Kind::DuplicateRoute,
        "route_not_found" => Kind::RouteNotFound,
        "shutdown" => Kind::Shutdown,
        "internal_server_error" => Kind::InternalServerError,
        _ => Kind::Other,
    }
}

/// `Registry` implementation that relays every mutation/read to a remote
/// registry node over `transport::Transport` (§4.3 back-end (b)). One
/// socket is dialed per unary call; `watch` keeps a streaming socket open
/// for the lifetime of the returned `Watch` handle.
pub struct NetworkRegistry {
    transport: Arc<dyn Transport>,
    address: String,
    codec: Arc<dyn Codec>,
}

impl NetworkRegistry {
    pub fn new(transport: Arc<dyn Transport>, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
            codec: Arc::new(JsonCodec::new()),
        }
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let socket = self
            .transport
            .dial(&self.address, DialOptions::default())
            .await?;
        socket
            .send(request_message(method, self.codec.as_ref(), &body)?)
            .await?;
        let response = socket
            .recv()
            .await?
            .ok_or_else(|| Error::new(Kind::Shutdown, "registry peer closed connection"))?;

        if let Some(err) = error_from_message(&response) {
            return Err(err);
        }

        decode_body(self.codec.as_ref(), &response.body)
    }
}

#[async_trait]
impl Registry for NetworkRegistry {
    async fn register(&self, domain: &str, service: Service, opts: RegisterOptions) -> Result<()> {
        let req = RegisterRequest {
            domain: domain.to_string(),
            service,
            ttl_secs: opts.ttl.as_secs(),
        };
        self.call(METHOD_REGISTER, serde_json::to_value(req).unwrap())
            .await?;
        Ok(())
    }

    async fn deregister(&self, domain: &str, service: Service) -> Result<()> {
        let req = DeregisterRequest {
            domain: domain.to_string(),
            service,
        };
        self.call(METHOD_DEREGISTER, serde_json::to_value(req).unwrap())
            .await?;
        Ok(())
    }

    async fn get_service(&self, domain: &str, name: &str) -> Result<Vec<Service>> {
        let req = GetServiceRequest {
            domain: domain.to_string(),
            name: name.to_string(),
        };
        let value = self
            .call(METHOD_GET_SERVICE, serde_json::to_value(req).unwrap())
            .await?;
        serde_json::from_value(value).map_err(|e| Error::wrap(Kind::BadRequest, e))
    }

    async fn list_services(&self, domain: &str) -> Result<Vec<Service>> {
        let req = ListServicesRequest {
            domain: domain.to_string(),
        };
        let value = self
            .call(METHOD_LIST_SERVICES, serde_json::to_value(req).unwrap())
            .await?;
        serde_json::from_value(value).map_err(|e| Error::wrap(Kind::BadRequest, e))
    }

    async fn watch(&self, domain: &str, service_filter: Option<&str>) -> Result<Box<dyn Watch>> {
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

        let req = WatchRequest {
            domain: domain.to_string(),
            service_filter: service_filter.map(String::from),
        };
        socket
            .send(request_message(
                METHOD_WATCH,
                self.codec.as_ref(),
                &serde_json::to_value(req).unwrap(),
            )?)
            .await?;

        Ok(Box::new(NetworkWatch {
            socket,
            codec: self.codec.clone(),
        }))
    }
}

struct NetworkWatch {
    socket: Box<dyn Socket>,
    codec: Arc<dyn Codec>,
}

#[async_trait]
impl Watch for NetworkWatch {
    async fn recv(&self) -> Result<WatchEvent> {
        let message = self
            .socket
            .recv()
            .await?
            .ok_or_else(|| Error::new(Kind::WatcherStopped, "watch stream closed"))?;

        if let Some(err) = error_from_message(&message) {
            return Err(err);
        }

        let value = decode_body(self.codec.as_ref(), &message.body)?;
        serde_json::from_value(value).map_err(|e| Error::wrap(Kind::BadRequest, e))
    }
}

/// Serves the wire protocol a `NetworkRegistry` client dials, delegating
/// every call to a locally-owned `Registry` (typically a `MemoryRegistry`).
/// Mirrors the accept-loop shape `transport`'s own tests use, generalized
/// to decode a method header and branch.
pub struct NetworkRegistryServer<R: Registry> {
    registry: Arc<R>,
    codec: Arc<dyn Codec>,
}

impl<R: Registry + 'static> NetworkRegistryServer<R> {
    pub fn new(registry: Arc<R>) -> Self {
        Self {
            registry,
            codec: Arc::new(JsonCodec::new()),
        }
    }

    /// Accepts sockets from `listener` forever, spawning one task per
    /// connection. Returns only if `accept` itself errors (listener torn
    /// down).
    pub async fn serve(&self, listener: &dyn Listener) -> Result<()> {
        loop {
            let socket = listener.accept().await?;
            let registry = self.registry.clone();
            let codec = self.codec.clone();
            common::async_std::task::spawn(async move {
                if let Err(e) = Self::handle_connection(registry, codec, socket).await {
                    eprintln!("registry connection failed: {}", e);
                }
            });
        }
    }

    async fn handle_connection(
        registry: Arc<R>,
        codec: Arc<dyn Codec>,
        socket: Box<dyn Socket>,
    ) -> Result<()> {
        let request = match socket.recv().await? {
            Some(m) => m,
            None => return Ok(()),
        };

        let method = request
            .header("Vine-Method")
            .ok_or_else(|| Error::new(Kind::BadRequest, "missing Vine-Method header"))?
            .to_string();

        match method.as_str() {
            METHOD_REGISTER => {
                let req: RegisterRequest = decode_json(&codec, &request)?;
                let opts = RegisterOptions {
                    ttl: std::time::Duration::from_secs(req.ttl_secs),
                    domain: req.domain.clone(),
                };
                let result = registry.register(&req.domain, req.service, opts).await;
                reply_unit(socket.as_ref(), codec.as_ref(), result).await
            }
            METHOD_DEREGISTER => {
                let req: DeregisterRequest = decode_json(&codec, &request)?;
                let result = registry.deregister(&req.domain, req.service).await;
                reply_unit(socket.as_ref(), codec.as_ref(), result).await
            }
            METHOD_GET_SERVICE => {
                let req: GetServiceRequest = decode_json(&codec, &request)?;
                let result = registry.get_service(&req.domain, &req.name).await;
                reply_value(socket.as_ref(), codec.as_ref(), result).await
            }
            METHOD_LIST_SERVICES => {
                let req: ListServicesRequest = decode_json(&codec, &request)?;
                let result = registry.list_services(&req.domain).await;
                reply_value(socket.as_ref(), codec.as_ref(), result).await
            }
            METHOD_WATCH => {
                let req: WatchRequest = decode_json(&codec, &request)?;
                let watch = registry
                    .watch(&req.domain, req.service_filter.as_deref())
                    .await?;
                loop {
                    let event = watch.recv().await?;
                    let value = serde_json::to_value(&event).unwrap();
                    let mut headers = std::collections::HashMap::new();
                    headers.insert("Content-Type".to_string(), codec.content_type().to_string());
                    socket
                        .send(Message {
                            headers,
                            body: encode_body(codec.as_ref(), &value)?.into(),
                        })
                        .await?;
                }
            }
            other => Err(Error::new(
                Kind::BadRequest,
                format!("unknown registry method {}", other),
            )),
        }
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(codec: &Arc<dyn Codec>, message: &Message) -> Result<T> {
    let value = decode_body(codec.as_ref(), &message.body)?;
    serde_json::from_value(value).map_err(|e| Error::wrap(Kind::BadRequest, e))
}

async fn reply_unit(socket: &dyn Socket, codec: &dyn Codec, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            let mut headers = std::collections::HashMap::new();
            headers.insert("Content-Type".to_string(), codec.content_type().to_string());
            socket
                .send(Message {
                    headers,
                    body: encode_body(codec, &serde_json::Value::Null)?.into(),
                })
                .await
        }
        Err(e) => reply_error(socket, codec, e).await,
    }
}

async fn reply_value<T: Serialize>(
    socket: &dyn Socket,
    codec: &dyn Codec,
    result: Result<T>,
) -> Result<()> {
    match result {
        Ok(value) => {
            let mut headers = std::collections::HashMap::new();
            headers.insert("Content-Type".to_string(), codec.content_type().to_string());
            socket
                .send(Message {
                    headers,
                    body: encode_body(codec, &serde_json::to_value(value).unwrap())?.into(),
                })
                .await
        }
        Err(e) => reply_error(socket, codec, e).await,
    }
}

async fn reply_error(socket: &dyn Socket, codec: &dyn Codec, error: Error) -> Result<()> {
    let mut headers = std::collections::HashMap::new();
    headers.insert("Vine-Error".to_string(), error.kind().to_string());
    headers.insert("Content-Type".to_string(), codec.content_type().to_string());
    let body = ErrorResponse {
        message: error.to_string(),
    };
    socket
        .send(Message {
            headers,
            body: encode_body(codec, &serde_json::to_value(body).unwrap())?.into(),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRegistry;
    use crate::model::Node;
    use std::collections::HashMap as StdHashMap;
    use transport::InMemoryTransport;

    fn svc(name: &str, node_id: &str) -> Service {
        Service {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            nodes: vec![Node {
                id: node_id.to_string(),
                address: "127.0.0.1:8080".to_string(),
                metadata: StdHashMap::new(),
            }],
            ..Default::default()
        }
    }

    #[async_std::test]
    async fn register_and_get_service_round_trip_over_the_wire() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let listener = transport.listen("svc://registry").await.unwrap();

        let backing = Arc::new(MemoryRegistry::new());
        let server = Arc::new(NetworkRegistryServer::new(backing));
        let server_clone = server.clone();
        let _serve_task = common::task::ChildTask::spawn(async move {
            let _ = server_clone.serve(listener.as_ref()).await;
        });

        let client = NetworkRegistry::new(transport.clone(), "svc://registry");
        client
            .register("", svc("foo.bar", "node-1"), RegisterOptions::default())
            .await
            .unwrap();

        let found = client.get_service("", "foo.bar").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].nodes[0].id, "node-1");
    }

    #[async_std::test]
    async fn get_service_not_found_propagates_over_the_wire() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let listener = transport.listen("svc://registry2").await.unwrap();

        let backing = Arc::new(MemoryRegistry::new());
        let server = Arc::new(NetworkRegistryServer::new(backing));
        let server_clone = server.clone();
        let _serve_task = common::task::ChildTask::spawn(async move {
            let _ = server_clone.serve(listener.as_ref()).await;
        });

        let client = NetworkRegistry::new(transport.clone(), "svc://registry2");
        let err = client.get_service("", "missing").await.unwrap_err();
        assert_eq!(err.kind(), Kind::NotFound);
    }
}
