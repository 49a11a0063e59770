use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_std::channel;
use async_std::sync::Mutex;
use async_trait::async_trait;
use common::errors::*;
use common::task::ChildTask;
use registry::{Action, Registry};

use crate::model::{now_millis, Advert, AdvertType, Event, EventType, Query, Route, Strategy, DEFAULT_LOCAL_METRIC};
use crate::table::{DefaultTable, Table};

/// How often accumulated table events are drained into an `Advert` and
/// sent to subscribers (§4.8 "Advertisement suppression").
pub const ADVERTISE_EVENTS_TICK: Duration = Duration::from_secs(10);

/// Channel capacity for `Router::advertise` subscribers (§5).
const ADVERT_BUFFER: usize = 128;

/// A live `Router::advertise` subscription.
#[async_trait]
pub trait AdvertWatch: Send + Sync {
    async fn recv(&self) -> Result<Advert>;
}

/// Owns the `Table` and wires it to the local service registry and to
/// peer routers (§4.8).
#[async_trait]
pub trait Router: Send + Sync {
    /// Starts registry ingestion: derives one local route per registered
    /// node and keeps the table in sync with subsequent registry events.
    async fn start(&self) -> Result<()>;

    /// Filtered route lookup, used by the RPC client/proxy to pick an
    /// address when routing through the overlay.
    async fn lookup(&self, service: &str, opts: Query) -> Result<Vec<Route>>;

    /// Subscribes to this router's outbound advert stream, filtered by
    /// `strategy`. The first item delivered is always a single `Announce`
    /// advert carrying the table's current contents; subsequent items are
    /// `RouteUpdate` adverts drained every `ADVERTISE_EVENTS_TICK`.
    async fn advertise(&self, strategy: Strategy) -> Result<Box<dyn AdvertWatch>>;

    /// Applies an `Advert` received from a peer router (§4.8 "Peer
    /// adverts"): events whose `route.router` equals `id()` are dropped
    /// (loop suppression), the rest are sorted by timestamp and replayed
    /// onto the table.
    async fn process_advert(&self, advert: Advert) -> Result<()>;

    fn id(&self) -> &str;

    fn table(&self) -> Arc<dyn Table>;
}

struct AdvertSubscriber {
    id: usize,
    strategy: Strategy,
    sender: channel::Sender<Advert>,
}

struct Shared {
    id: String,
    network: String,
    registry: Arc<dyn Registry>,
    table: Arc<DefaultTable>,
    pending_events: Mutex<HashMap<u64, Event>>,
    subscribers: Mutex<(Vec<AdvertSubscriber>, usize)>,
}

/// Default `Router` implementation (§4.8).
pub struct DefaultRouter {
    shared: Arc<Shared>,
    _registry_watch: Mutex<Option<ChildTask>>,
    _ticker: ChildTask,
}

impl DefaultRouter {
    pub fn new(id: impl Into<String>, network: impl Into<String>, registry: Arc<dyn Registry>) -> Self {
        let shared = Arc::new(Shared {
            id: id.into(),
            network: network.into(),
            registry,
            table: Arc::new(DefaultTable::new()),
            pending_events: Mutex::new(HashMap::new()),
            subscribers: Mutex::new((vec![], 0)),
        });

        let ticker = ChildTask::spawn(Self::tick_loop(shared.clone()));

        Self {
            shared,
            _registry_watch: Mutex::new(None),
            _ticker: ticker,
        }
    }

    fn local_route(shared: &Shared, service: &str, address: &str) -> Route {
        Route {
            service: service.to_string(),
            address: address.to_string(),
            gateway: String::new(),
            network: shared.network.clone(),
            router: shared.id.clone(),
            link: "local".to_string(),
            metric: DEFAULT_LOCAL_METRIC,
        }
    }

    /// Accumulates one table `Event` into `pending_events`, dampening
    /// flapping per §4.8: a `Delete` that lands on top of a still-pending
    /// `Create` cancels both (the route never existed as far as peers are
    /// concerned); anything else just keeps the latest event for that
    /// route.
    async fn accumulate(shared: &Arc<Shared>, event: Event) {
        let key = event.route.match_hash();
        let mut pending = shared.pending_events.lock().await;
        match pending.get(&key) {
            Some(existing) if existing.kind == EventType::Create && event.kind == EventType::Delete => {
                pending.remove(&key);
            }
            _ => {
                pending.insert(key, event);
            }
        }
    }

    async fn tick_loop(shared: Arc<Shared>) {
        loop {
            common::async_std::task::sleep(ADVERTISE_EVENTS_TICK).await;

            let events: Vec<Event> = {
                let mut pending = shared.pending_events.lock().await;
                pending.drain().map(|(_, e)| e).collect()
            };
            if events.is_empty() {
                continue;
            }

            let subscribers = shared.subscribers.lock().await;
            for sub in &subscribers.0 {
                let filtered = filter_events(&events, sub.strategy);
                if filtered.is_empty() {
                    continue;
                }
                let advert = Advert {
                    id: shared.id.clone(),
                    kind: AdvertType::RouteUpdate,
                    ttl_ms: ADVERTISE_EVENTS_TICK.as_millis() as u64 * 2,
                    timestamp: now_millis(),
                    events: filtered,
                };
                let _ = sub.sender.try_send(advert);
            }
        }
    }

    async fn watch_registry(shared: Arc<Shared>) {
        loop {
            let watch = match shared.registry.watch("", None).await {
                Ok(w) => w,
                Err(_) => {
                    common::async_std::task::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            loop {
                let event = match watch.recv().await {
                    Ok(e) => e,
                    Err(_) => break,
                };

                for node in &event.service.nodes {
                    let route = Self::local_route(&shared, &event.service.name, &node.address);
                    let result = match event.action {
                        Action::Create => shared.table.create(route.clone()).await,
                        Action::Update => shared.table.update(route.clone()).await,
                        Action::Delete => shared.table.delete(route.clone()).await,
                    };
                    // Duplicate/not-found is benign here: registry events
                    // can race with a router restart that already saw the
                    // current state via `start()`'s initial listing.
                    if let Err(err) = result {
                        if !matches!(err.kind(), Kind::DuplicateRoute | Kind::RouteNotFound) {
                            continue;
                        }
                    }
                    Self::accumulate(
                        &shared,
                        Event {
                            kind: action_to_event_kind(event.action),
                            timestamp: now_millis(),
                            route,
                        },
                    )
                    .await;
                }
            }
        }
    }
}

fn action_to_event_kind(action: Action) -> EventType {
    match action {
        Action::Create => EventType::Create,
        Action::Update => EventType::Update,
        Action::Delete => EventType::Delete,
    }
}

fn filter_events(events: &[Event], strategy: Strategy) -> Vec<Event> {
    events
        .iter()
        .filter(|e| match strategy {
            Strategy::AdvertiseAll => true,
            Strategy::AdvertiseLocal => e.route.link == "local",
            Strategy::AdvertiseNone => false,
        })
        .cloned()
        .collect()
}

#[async_trait]
impl Router for DefaultRouter {
    async fn start(&self) -> Result<()> {
        let services = self.shared.registry.list_services("").await.unwrap_or_default();
        for service in services {
            for node in &service.nodes {
                let route = Self::local_route(&self.shared, &service.name, &node.address);
                let _ = self.shared.table.create(route).await;
            }
        }

        let mut guard = self._registry_watch.lock().await;
        *guard = Some(ChildTask::spawn(Self::watch_registry(self.shared.clone())));
        Ok(())
    }

    async fn lookup(&self, service: &str, mut opts: Query) -> Result<Vec<Route>> {
        opts.service = service.to_string();
        self.shared.table.query(&opts).await
    }

    async fn advertise(&self, strategy: Strategy) -> Result<Box<dyn AdvertWatch>> {
        if strategy == Strategy::AdvertiseNone {
            // §4.8: "AdvertiseNone returns an empty stream without
            // consuming events" — no subscriber is registered at all.
            return Ok(Box::new(NullAdvertWatch));
        }

        let announce_events: Vec<Event> = self
            .shared
            .table
            .query(&Query {
                strategy,
                ..Default::default()
            })
            .await?
            .into_iter()
            .map(|route| Event {
                kind: EventType::Create,
                timestamp: now_millis(),
                route,
            })
            .collect();

        let (sender, receiver) = channel::bounded(ADVERT_BUFFER);

        let announce = Advert {
            id: self.shared.id.clone(),
            kind: AdvertType::Announce,
            ttl_ms: ADVERTISE_EVENTS_TICK.as_millis() as u64 * 2,
            timestamp: now_millis(),
            events: announce_events,
        };
        let _ = sender.try_send(announce);

        let mut subscribers = self.shared.subscribers.lock().await;
        let id = subscribers.1 + 1;
        subscribers.1 = id;
        subscribers.0.push(AdvertSubscriber { id, strategy, sender });

        Ok(Box::new(AdvertWatchHandle {
            shared: self.shared.clone(),
            id,
            receiver,
        }))
    }

    async fn process_advert(&self, mut advert: Advert) -> Result<()> {
        advert.events.sort_by_key(|e| e.timestamp);

        for event in advert.events {
            if event.route.router == self.shared.id {
                // Loop suppression (§4.8 step 2): never apply our own
                // routes back onto ourselves.
                continue;
            }

            let result = match event.kind {
                EventType::Create => self.shared.table.create(event.route).await,
                EventType::Update => self.shared.table.update(event.route).await,
                EventType::Delete => self.shared.table.delete(event.route).await,
            };

            if let Err(err) = result {
                if !matches!(err.kind(), Kind::DuplicateRoute | Kind::RouteNotFound) {
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    fn id(&self) -> &str {
        &self.shared.id
    }

    fn table(&self) -> Arc<dyn Table> {
        self.shared.table.clone()
    }
}

struct NullAdvertWatch;

#[async_trait]
impl AdvertWatch for NullAdvertWatch {
    async fn recv(&self) -> Result<Advert> {
        std::future::pending().await
    }
}

struct AdvertWatchHandle {
    shared: Arc<Shared>,
    id: usize,
    receiver: channel::Receiver<Advert>,
}

impl Drop for AdvertWatchHandle {
    fn drop(&mut self) {
        let shared = self.shared.clone();
        let id = self.id;
        common::async_std::task::spawn(async move {
            let mut subscribers = shared.subscribers.lock().await;
            subscribers.0.retain(|s| s.id != id);
        });
    }
}

#[async_trait]
impl AdvertWatch for AdvertWatchHandle {
    async fn recv(&self) -> Result<Advert> {
        self.receiver
            .recv()
            .await
            .map_err(|_| Error::new(Kind::WatcherStopped, "advert channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry::{MemoryRegistry, Node, RegisterOptions, Service};
    use std::collections::HashMap as StdHashMap;

    fn svc(name: &str, node_id: &str, addr: &str) -> Service {
        Service {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            nodes: vec![Node {
                id: node_id.to_string(),
                address: addr.to_string(),
                metadata: StdHashMap::new(),
            }],
            ..Default::default()
        }
    }

    #[async_std::test]
    async fn start_ingests_existing_registry_entries() {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .register("", svc("foo.bar", "n1", "10.0.0.1:8080"), RegisterOptions::default())
            .await
            .unwrap();

        let router = DefaultRouter::new("r1", "default", registry);
        router.start().await.unwrap();

        let routes = router.lookup("foo.bar", Query::default()).await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].router, "r1");
        assert_eq!(routes[0].link, "local");
    }

    #[async_std::test]
    async fn loop_suppression_drops_self_originated_events() {
        let registry = Arc::new(MemoryRegistry::new());
        let router = DefaultRouter::new("r1", "default", registry);

        let route = Route {
            service: "foo.bar".to_string(),
            address: "10.0.0.1:8080".to_string(),
            gateway: String::new(),
            network: "default".to_string(),
            router: "r1".to_string(),
            link: "peer-1".to_string(),
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

        router.process_advert(advert).await.unwrap();
        let routes = router.lookup("foo.bar", Query::default()).await.unwrap();
        assert!(routes.is_empty());
    }

    #[async_std::test]
    async fn peer_advert_from_another_router_is_applied() {
        let registry = Arc::new(MemoryRegistry::new());
        let router = DefaultRouter::new("r1", "default", registry);

        let route = Route {
            service: "foo.bar".to_string(),
            address: "10.0.0.1:8080".to_string(),
            gateway: String::new(),
            network: "default".to_string(),
            router: "r2".to_string(),
            link: "peer-r2".to_string(),
            metric: 5,
        };
        let advert = Advert {
            id: "r2".to_string(),
            kind: AdvertType::RouteUpdate,
            ttl_ms: 1000,
            timestamp: now_millis(),
            events: vec![Event {
                kind: EventType::Create,
                timestamp: now_millis(),
                route,
            }],
        };

        router.process_advert(advert).await.unwrap();
        let routes = router.lookup("foo.bar", Query::default()).await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].router, "r2");
    }

    #[async_std::test]
    async fn advertise_none_returns_a_stream_that_never_yields() {
        let registry = Arc::new(MemoryRegistry::new());
        let router = DefaultRouter::new("r1", "default", registry);
        let watch = router.advertise(Strategy::AdvertiseNone).await.unwrap();

        let result = async_std::future::timeout(Duration::from_millis(50), watch.recv()).await;
        assert!(result.is_err(), "AdvertiseNone should never deliver an advert");
    }

    #[async_std::test]
    async fn advertise_all_flushes_current_state_as_an_announce() {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .register("", svc("foo.bar", "n1", "10.0.0.1:8080"), RegisterOptions::default())
            .await
            .unwrap();

        let router = DefaultRouter::new("r1", "default", registry);
        router.start().await.unwrap();

        let watch = router.advertise(Strategy::AdvertiseAll).await.unwrap();
        let advert = watch.recv().await.unwrap();
        assert_eq!(advert.kind, AdvertType::Announce);
        assert_eq!(advert.events.len(), 1);
    }
}
