use std::collections::HashMap;
use std::sync::Arc;

use async_std::channel;
use async_std::sync::Mutex;
use async_trait::async_trait;
use common::errors::*;

use crate::model::{now_millis, Event, EventType, Query, Route};

/// Channel capacity for `Table::watch` subscribers (§5 "Adverts are
/// broadcast via buffered channels (default capacity 128)").
const WATCH_BUFFER: usize = 128;

struct Entry {
    route: Route,
    timestamp: u64,
}

struct WatcherEntry {
    id: usize,
    sender: channel::Sender<Event>,
}

struct Shared {
    routes: Mutex<HashMap<u64, Entry>>,
    watchers: Mutex<(Vec<WatcherEntry>, usize)>,
}

/// A handle to a live `Table::watch` subscription (§4.7).
#[async_trait]
pub trait TableWatch: Send + Sync {
    async fn recv(&self) -> Result<Event>;
}

/// The distributed routing table (§4.7): a set of `Route`s keyed by the
/// structural hash of every field except `metric`, so an `Update` can find
/// and replace the route it supersedes.
#[async_trait]
pub trait Table: Send + Sync {
    async fn create(&self, route: Route) -> Result<()>;

    async fn update(&self, route: Route) -> Result<()>;

    async fn delete(&self, route: Route) -> Result<()>;

    async fn query(&self, q: &Query) -> Result<Vec<Route>>;

    async fn watch(&self) -> Result<Box<dyn TableWatch>>;
}

/// In-process `Table` implementation, guarded by a single mutex (routes
/// are small and operations are short, so one lock is simpler than the
/// read-mostly split described in §5 for tables shared across many
/// tasks — `DefaultRouter` wraps this in `Arc` for that sharing).
pub struct DefaultTable {
    shared: Arc<Shared>,
}

impl DefaultTable {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                routes: Mutex::new(HashMap::new()),
                watchers: Mutex::new((vec![], 0)),
            }),
        }
    }

    async fn emit(&self, kind: EventType, route: Route) {
        let event = Event {
            kind,
            timestamp: now_millis(),
            route,
        };
        let watchers = self.shared.watchers.lock().await;
        for w in &watchers.0 {
            // Bounded channel: a full buffer means a slow consumer loses
            // this event rather than blocking the writer (§4.7 "Watch:
            // ... Buffered; slow consumers lose events if the buffer is
            // full").
            let _ = w.sender.try_send(event.clone());
        }
    }
}

impl Default for DefaultTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Table for DefaultTable {
    async fn create(&self, route: Route) -> Result<()> {
        let key = route.match_hash();
        {
            let mut routes = self.shared.routes.lock().await;
            if routes.contains_key(&key) {
                return Err(Error::new(Kind::DuplicateRoute, format!("route already exists for {}", route.service)));
            }
            routes.insert(
                key,
                Entry {
                    route: route.clone(),
                    timestamp: now_millis(),
                },
            );
        }
        self.emit(EventType::Create, route).await;
        Ok(())
    }

    async fn update(&self, route: Route) -> Result<()> {
        let key = route.match_hash();
        {
            let mut routes = self.shared.routes.lock().await;
            routes.insert(
                key,
                Entry {
                    route: route.clone(),
                    timestamp: now_millis(),
                },
            );
        }
        self.emit(EventType::Update, route).await;
        Ok(())
    }

    async fn delete(&self, route: Route) -> Result<()> {
        let key = route.match_hash();
        {
            let mut routes = self.shared.routes.lock().await;
            if routes.remove(&key).is_none() {
                return Err(Error::new(Kind::RouteNotFound, format!("no route for {}", route.service)));
            }
        }
        self.emit(EventType::Delete, route).await;
        Ok(())
    }

    async fn query(&self, q: &Query) -> Result<Vec<Route>> {
        let routes = self.shared.routes.lock().await;
        let mut matched: Vec<(Route, u64)> = routes
            .values()
            .filter(|e| q.matches(&e.route))
            .map(|e| (e.route.clone(), e.timestamp))
            .collect();

        // Tie-break: metric ascending, then insertion timestamp (§4.7).
        matched.sort_by(|a, b| a.0.metric.cmp(&b.0.metric).then(a.1.cmp(&b.1)));

        Ok(matched.into_iter().map(|(r, _)| r).collect())
    }

    async fn watch(&self) -> Result<Box<dyn TableWatch>> {
        let mut watchers = self.shared.watchers.lock().await;
        let id = watchers.1 + 1;
        watchers.1 = id;

        let (sender, receiver) = channel::bounded(WATCH_BUFFER);
        watchers.0.push(WatcherEntry { id, sender });

        Ok(Box::new(TableWatchHandle {
            shared: self.shared.clone(),
            id,
            receiver,
        }))
    }
}

struct TableWatchHandle {
    shared: Arc<Shared>,
    id: usize,
    receiver: channel::Receiver<Event>,
}

impl Drop for TableWatchHandle {
    fn drop(&mut self) {
        let shared = self.shared.clone();
        let id = self.id;
        common::async_std::task::spawn(async move {
            let mut watchers = shared.watchers.lock().await;
            watchers.0.retain(|w| w.id != id);
        });
    }
}

#[async_trait]
impl TableWatch for TableWatchHandle {
    async fn recv(&self) -> Result<Event> {
        self.receiver
            .recv()
            .await
            .map_err(|_| Error::new(Kind::WatcherStopped, "route watch channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(service: &str, metric: i64) -> Route {
        Route {
            service: service.to_string(),
            address: "10.0.0.1:8080".to_string(),
            gateway: String::new(),
            network: "default".to_string(),
            router: "r1".to_string(),
            link: "local".to_string(),
            metric,
        }
    }

    #[async_std::test]
    async fn create_then_query_round_trips() {
        let table = DefaultTable::new();
        table.create(route("svc", 10)).await.unwrap();

        let found = table.query(&Query::for_service("svc")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metric, 10);
    }

    #[async_std::test]
    async fn duplicate_create_is_rejected() {
        let table = DefaultTable::new();
        table.create(route("svc", 10)).await.unwrap();
        let err = table.create(route("svc", 10)).await.unwrap_err();
        assert_eq!(err.kind(), Kind::DuplicateRoute);
    }

    #[async_std::test]
    async fn update_replaces_matching_route_ignoring_metric() {
        let table = DefaultTable::new();
        table.create(route("svc", 10)).await.unwrap();
        table.update(route("svc", 20)).await.unwrap();

        let found = table.query(&Query::for_service("svc")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metric, 20);
    }

    #[async_std::test]
    async fn delete_missing_route_is_not_found() {
        let table = DefaultTable::new();
        let err = table.delete(route("svc", 10)).await.unwrap_err();
        assert_eq!(err.kind(), Kind::RouteNotFound);
    }

    #[async_std::test]
    async fn query_orders_by_metric_then_insertion_order() {
        let table = DefaultTable::new();
        let mut slow = route("svc", 30);
        slow.address = "10.0.0.2:8080".to_string();
        table.create(slow).await.unwrap();
        table.create(route("svc", 10)).await.unwrap();

        let found = table.query(&Query::for_service("svc")).await.unwrap();
        assert_eq!(found[0].metric, 10);
        assert_eq!(found[1].metric, 30);
    }

    #[async_std::test]
    async fn local_strategy_excludes_non_local_routes() {
        let table = DefaultTable::new();
        table.create(route("svc", 10)).await.unwrap();
        let mut remote = route("svc", 5);
        remote.address = "10.0.0.9:8080".to_string();
        remote.link = "peer-1".to_string();
        table.create(remote).await.unwrap();

        let q = Query {
            service: "svc".to_string(),
            strategy: crate::model::Strategy::AdvertiseLocal,
            ..Default::default()
        };
        let found = table.query(&q).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].link, "local");
    }

    #[async_std::test]
    async fn watcher_observes_create_update_delete() {
        let table = DefaultTable::new();
        let watch = table.watch().await.unwrap();

        table.create(route("svc", 10)).await.unwrap();
        table.update(route("svc", 5)).await.unwrap();
        table.delete(route("svc", 5)).await.unwrap();

        assert_eq!(watch.recv().await.unwrap().kind, EventType::Create);
        assert_eq!(watch.recv().await.unwrap().kind, EventType::Update);
        assert_eq!(watch.recv().await.unwrap().kind, EventType::Delete);
    }
}
