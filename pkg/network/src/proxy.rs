use std::sync::Arc;

use common::errors::*;
use router::{Query, Route, Router};
use transport::{Message, Socket};
use tunnel::{DialOptions, Mode, Session, Tunnel};

/// Bridges inbound RPC traffic to the overlay (§4.9 "Network
/// composition"): receives an accepted local socket, resolves `service`
/// through the `Router`, opens a unicast tunnel session to the winning
/// route's address, and copies frames in both directions until either
/// side closes.
pub struct Proxy {
    router: Arc<dyn Router>,
    tunnel: Arc<Tunnel>,
}

impl Proxy {
    pub fn new(router: Arc<dyn Router>, tunnel: Arc<Tunnel>) -> Self {
        Self { router, tunnel }
    }

    /// Picks the best (lowest-metric) known route to `service`.
    pub async fn resolve(&self, service: &str) -> Result<Route> {
        let routes = self.router.lookup(service, Query::default()).await?;
        routes
            .into_iter()
            .next()
            .ok_or_else(|| Error::new(Kind::NotFound, format!("no route to {}", service)))
    }

    /// Proxies one locally accepted socket through to `service`, possibly
    /// over multiple overlay hops. Returns once both directions have
    /// drained (either side closed, or the tunnel session died).
    pub async fn forward(&self, service: &str, local: Box<dyn Socket>) -> Result<()> {
        let route = self.resolve(service).await?;
        let session = Arc::new(
            self.tunnel
                .dial(&route.address, Mode::Unicast, DialOptions::default())
                .await?,
        );
        let local: Arc<dyn Socket> = Arc::from(local);

        let upstream = Self::pump_to_tunnel(local.clone(), session.clone());
        let downstream = Self::pump_to_local(local.clone(), session.clone());
        common::futures::future::select(Box::pin(upstream), Box::pin(downstream)).await;

        let _ = session.close().await;
        let _ = local.close().await;
        Ok(())
    }

    async fn pump_to_tunnel(local: Arc<dyn Socket>, session: Arc<Session>) {
        loop {
            match local.recv().await {
                Ok(Some(msg)) => {
                    if session.send(msg.body).await.is_err() {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    async fn pump_to_local(local: Arc<dyn Socket>, session: Arc<Session>) {
        loop {
            match session.recv().await {
                Ok(Some(body)) => {
                    let message = Message {
                        headers: Default::default(),
                        body,
                    };
                    if local.send(message).await.is_err() {
                        return;
                    }
                }
                _ => return,
            }
        }
    }
}
