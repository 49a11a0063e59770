//! Bridges `tunnel` and `router` into one overlay network (§4.9 "Network
//! composition"), and proxies ordinary RPC traffic across it.
//!
//! Neither `tunnel` nor `router` depends on the other; this crate is the
//! only place that knows both, so it owns the translation between
//! `tunnel::Frame::Announce`'s opaque JSON payload and `router::Advert`.

mod network;
mod observer;
mod proxy;

pub use network::Network;
pub use proxy::Proxy;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use registry::{MemoryRegistry, Node, RegisterOptions, Service};
    use router::{DefaultRouter, Query};
    use transport::InMemoryTransport;
    use tunnel::Tunnel;

    use super::*;

    fn svc(name: &str, addr: &str) -> Service {
        Service {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            nodes: vec![Node {
                id: "n1".to_string(),
                address: addr.to_string(),
                metadata: Default::default(),
            }],
            ..Default::default()
        }
    }

    #[async_std::test]
    async fn announce_over_a_new_link_populates_the_peer_router_table() {
        let net = Arc::new(InMemoryTransport::new());

        let registry_a = Arc::new(MemoryRegistry::new());
        registry_a
            .register("", svc("foo.bar", "10.0.0.1:9000"), RegisterOptions::default())
            .await
            .unwrap();
        let router_a: Arc<dyn router::Router> = Arc::new(DefaultRouter::new("a", "default", registry_a));
        router_a.start().await.unwrap();
        let tunnel_a = Arc::new(Tunnel::new("a", "secret", net.clone()));
        let _network_a = Network::new(router_a.clone(), tunnel_a.clone(), "default").await.unwrap();

        let registry_b = Arc::new(MemoryRegistry::new());
        let router_b: Arc<dyn router::Router> = Arc::new(DefaultRouter::new("b", "default", registry_b));
        router_b.start().await.unwrap();
        let tunnel_b = Arc::new(Tunnel::new("b", "secret", net.clone()));
        let _network_b = Network::new(router_b.clone(), tunnel_b.clone(), "default").await.unwrap();

        tunnel_b.listen("peer-b").await.unwrap();
        tunnel_a.connect("peer-b").await.unwrap();

        // give the Discover/Announce round trip a chance to land.
        async_std::task::sleep(Duration::from_millis(100)).await;

        let routes = router_b.lookup("foo.bar", Query::default()).await.unwrap();
        assert!(routes.iter().any(|r| r.router == "a"));
    }

    #[async_std::test]
    async fn proxy_forwards_raw_frames_to_the_resolved_route() {
        let net = Arc::new(InMemoryTransport::new());

        let registry = Arc::new(MemoryRegistry::new());
        registry
            .register("", svc("echo", "peer-dest"), RegisterOptions::default())
            .await
            .unwrap();
        let router: Arc<dyn router::Router> = Arc::new(DefaultRouter::new("gateway", "default", registry));
        router.start().await.unwrap();

        let tunnel = Arc::new(Tunnel::new("gateway", "secret", net.clone()));
        let network = Network::new(router, tunnel.clone(), "default").await.unwrap();

        let dest_tunnel = Arc::new(Tunnel::new("dest", "secret", net.clone()));
        dest_tunnel.listen("peer-dest").await.unwrap();
        let mut accepted = dest_tunnel.listen_channel("10.0.0.1:9000").await;
        tunnel.connect("peer-dest").await.unwrap();
        async_std::task::sleep(Duration::from_millis(50)).await;

        let local_transport = Arc::new(InMemoryTransport::new());
        let local_listener = local_transport.listen("svc://echo-local").await.unwrap();
        let local_caller = local_transport
            .dial("svc://echo-local", Default::default())
            .await
            .unwrap();

        let _forward_task = async_std::task::spawn(async move {
            let local = local_listener.accept().await.unwrap();
            let _ = network.proxy.forward("echo", local).await;
        });

        local_caller
            .send(transport::Message {
                headers: Default::default(),
                body: bytes::Bytes::from_static(b"ping"),
            })
            .await
            .unwrap();

        let dest_session = accepted.recv().await.unwrap();
        let body = dest_session.recv().await.unwrap().unwrap();
        assert_eq!(body.as_ref(), b"ping");
    }
}
