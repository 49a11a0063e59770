//! RPC server runtime (§4.6): accepts sockets, decodes requests, dispatches
//! to registered handlers, writes responses, and keeps the instance's
//! registry registration alive until `Server::stop` drains it.

mod dispatch;
mod model;
mod registration;
mod server;
mod stream;

pub use model::{Handler, StreamHandler};
pub use server::Server;
pub use stream::ServerStream;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use broker::MemoryBroker;
    use codec::{decode_body, encode_body, JsonCodec};
    use registry::{MemoryRegistry, Registry};
    use serde_json::json;
    use transport::{DialOptions, InMemoryTransport, Message};

    use super::*;

    fn raw_request(service: &str, method: &str, body: &serde_json::Value) -> Message {
        let codec = JsonCodec::new();
        let mut headers = HashMap::new();
        headers.insert("Vine-Id".to_string(), "req-1".to_string());
        headers.insert("Vine-Service".to_string(), service.to_string());
        headers.insert("Vine-Method".to_string(), method.to_string());
        headers.insert("Vine-Endpoint".to_string(), method.to_string());
        headers.insert("Content-Type".to_string(), codec::JSON.to_string());
        Message {
            headers,
            body: encode_body(&codec, body).unwrap().into(),
        }
    }

    #[async_std::test]
    async fn registered_unary_handler_round_trips() {
        let transport: Arc<dyn transport::Transport> = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(MemoryRegistry::new());
        let broker = Arc::new(MemoryBroker::new());

        let server = Server::new("node-1", "echo.service", "1.0.0", transport.clone(), registry.clone(), broker);
        server
            .handle("echo.service", "Echo.Say", json!({}), json!({}), |_ctx, body| async move { Ok(body) })
            .await;
        server.start("svc://echo-server").await.unwrap();

        let socket = transport.dial("svc://echo-server", DialOptions::default()).await.unwrap();
        socket
            .send(raw_request("echo.service", "Echo.Say", &json!({"text": "hi"})))
            .await
            .unwrap();

        let response = socket.recv().await.unwrap().unwrap();
        assert!(response.header("Vine-Error").is_none());
        let codec = JsonCodec::new();
        let decoded = decode_body(&codec, &response.body).unwrap();
        assert_eq!(decoded, json!({"text": "hi"}));
    }

    #[async_std::test]
    async fn call_to_unregistered_method_gets_vine_error() {
        let transport: Arc<dyn transport::Transport> = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(MemoryRegistry::new());
        let broker = Arc::new(MemoryBroker::new());

        let server = Server::new("node-1", "echo.service", "1.0.0", transport.clone(), registry, broker);
        server.start("svc://echo-missing").await.unwrap();

        let socket = transport.dial("svc://echo-missing", DialOptions::default()).await.unwrap();
        socket
            .send(raw_request("echo.service", "Nope.Go", &json!(null)))
            .await
            .unwrap();

        let response = socket.recv().await.unwrap().unwrap();
        assert!(response.header("Vine-Error").is_some());
    }

    #[async_std::test]
    async fn handler_panic_is_recovered_into_an_error_frame() {
        let transport: Arc<dyn transport::Transport> = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(MemoryRegistry::new());
        let broker = Arc::new(MemoryBroker::new());

        let server = Server::new("node-1", "panics.service", "1.0.0", transport.clone(), registry, broker);
        server
            .handle("panics.service", "Boom.Go", json!({}), json!({}), |_ctx, _body| async move {
                panic!("handler exploded")
            })
            .await;
        server.start("svc://panics").await.unwrap();

        let socket = transport.dial("svc://panics", DialOptions::default()).await.unwrap();
        socket
            .send(raw_request("panics.service", "Boom.Go", &json!(null)))
            .await
            .unwrap();

        let response = socket.recv().await.unwrap().unwrap();
        assert!(response.header("Vine-Error").is_some());
    }

    #[async_std::test]
    async fn internal_handlers_are_not_advertised_but_still_dispatch() {
        let transport: Arc<dyn transport::Transport> = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(MemoryRegistry::new());
        let broker = Arc::new(MemoryBroker::new());

        let server = Server::new("node-1", "internal.service", "1.0.0", transport.clone(), registry.clone(), broker);
        server
            .handle_internal("internal.service", "Health.Check", json!({}), json!({}), |_ctx, _body| async move {
                Ok(json!({"ok": true}))
            })
            .await;
        server.start("svc://internal-svc").await.unwrap();

        let services = registry.get_service("", "internal.service").await.unwrap();
        assert!(services[0].endpoints.is_empty());

        let socket = transport.dial("svc://internal-svc", DialOptions::default()).await.unwrap();
        socket
            .send(raw_request("internal.service", "Health.Check", &json!(null)))
            .await
            .unwrap();
        let response = socket.recv().await.unwrap().unwrap();
        let codec = JsonCodec::new();
        assert_eq!(decode_body(&codec, &response.body).unwrap(), json!({"ok": true}));
    }

    #[async_std::test]
    async fn stop_deregisters_the_service() {
        let transport: Arc<dyn transport::Transport> = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(MemoryRegistry::new());
        let broker = Arc::new(MemoryBroker::new());

        let server = Server::new("node-1", "stoppable.service", "1.0.0", transport, registry.clone(), broker);
        server.start("svc://stoppable").await.unwrap();
        assert!(registry.get_service("", "stoppable.service").await.is_ok());

        server.stop().await.unwrap();
        assert!(registry.get_service("", "stoppable.service").await.is_err());
    }
}
