//! Authenticated multiplexed sessions between mesh nodes over raw
//! transport links (§4.9 "Tunnel & Network Mesh").
//!
//! Deliberately has no knowledge of `router`: route advertisements ride
//! as an opaque JSON payload on `Frame::Announce` and are handed to
//! whatever `RouteObserver` the embedding `network` crate installs. This
//! keeps `tunnel` usable standalone and avoids a `tunnel` <-> `router`
//! crate cycle (§9 "Design Notes").

mod link;
mod model;
mod session;
mod tunnel;

pub use model::{CloseReason, Frame, Mode, SessionState};
pub use session::Session;
pub use tunnel::{DialOptions, RouteObserver, Tunnel};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_std::future::timeout;
    use bytes::Bytes;
    use transport::{InMemoryTransport, Transport};

    use super::*;

    fn shared_transport() -> Arc<dyn Transport> {
        Arc::new(InMemoryTransport::new())
    }

    #[async_std::test]
    async fn unicast_delivers_payloads_in_order() {
        let net = shared_transport();

        let server = Arc::new(Tunnel::new("server", "secret", net.clone()));
        server.listen("b").await.unwrap();
        let mut accepted = server.listen_channel("echo").await;

        let client = Arc::new(Tunnel::new("client", "secret", net.clone()));
        client.connect("b").await.unwrap();

        // give the accept loop a tick to register the inbound link.
        async_std::task::sleep(Duration::from_millis(20)).await;

        let dial_session = client
            .dial("echo", Mode::Unicast, DialOptions::default())
            .await
            .unwrap();

        let accept_session = timeout(Duration::from_secs(1), accepted.recv())
            .await
            .unwrap()
            .unwrap();

        for i in 0..3u8 {
            dial_session.send(Bytes::from(vec![i])).await.unwrap();
        }

        for i in 0..3u8 {
            let body = timeout(Duration::from_secs(1), accept_session.recv())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(body.as_ref(), &[i]);
        }
    }

    #[async_std::test]
    async fn wrong_token_is_denied_without_delivering_payload() {
        let net = shared_transport();

        let server = Arc::new(Tunnel::new("server", "secret", net.clone()));
        server.listen("b").await.unwrap();
        let mut accepted = server.listen_channel("echo").await;

        let client = Arc::new(Tunnel::new("client", "wrong-secret", net.clone()));
        client.connect("b").await.unwrap();
        async_std::task::sleep(Duration::from_millis(20)).await;

        let result = client
            .dial(
                "echo",
                Mode::Unicast,
                DialOptions {
                    dial_timeout: Duration::from_millis(300),
                },
            )
            .await;

        assert!(result.is_err());
        assert!(timeout(Duration::from_millis(100), accepted.recv()).await.is_err());
    }

    #[async_std::test]
    async fn broadcast_reaches_peer_without_explicit_listener() {
        let net = shared_transport();

        let server = Arc::new(Tunnel::new("server", "secret", net.clone()));
        server.listen("b").await.unwrap();

        let client = Arc::new(Tunnel::new("client", "secret", net.clone()));
        client.connect("b").await.unwrap();
        async_std::task::sleep(Duration::from_millis(20)).await;

        let session = client
            .dial("announcements", Mode::Broadcast, DialOptions::default())
            .await
            .unwrap();
        session.send(Bytes::from_static(b"hello")).await.unwrap();
    }
}
