use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Reserved metric value denoting an unreachable route (§3 "Rule / Route").
pub const METRIC_UNREACHABLE: i64 = i64::MAX;

/// Default metric `DefaultRouter` assigns to routes it derives from its
/// own local registry (§4.8 "Registry ingestion").
pub const DEFAULT_LOCAL_METRIC: i64 = 10;

/// `"*"` in `service`/`address` denotes a default gateway (§3).
pub const WILDCARD: &str = "*";

/// A single routing table entry (§3 "Rule / Route").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub service: String,
    pub address: String,
    pub gateway: String,
    pub network: String,
    pub router: String,
    pub link: String,
    pub metric: i64,
}

impl Route {
    /// Hash of every field except `metric`, used both as the dedup key a
    /// `Create` checks for collisions (§3 "Route identity") and to match
    /// an `Update` against the route it supersedes (§4.7 "Update:
    /// replaces (matched by hash ignoring metric)") — the table uses one
    /// key scheme for both, since a `Create` colliding on everything but
    /// metric is the same route as far as dedup is concerned.
    pub fn match_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.service.hash(&mut hasher);
        self.address.hash(&mut hasher);
        self.gateway.hash(&mut hasher);
        self.network.hash(&mut hasher);
        self.router.hash(&mut hasher);
        self.link.hash(&mut hasher);
        hasher.finish()
    }

    pub fn is_default_gateway(&self) -> bool {
        self.service == WILDCARD && self.address == WILDCARD
    }
}

/// Filter passed to `Table::query`/`Router::lookup` (§4.7). An empty
/// string on any field means wildcard (matches anything).
#[derive(Clone, Debug, Default)]
pub struct Query {
    pub service: String,
    pub address: String,
    pub gateway: String,
    pub router: String,
    pub network: String,
    pub link: String,
    pub strategy: Strategy,
}

impl Query {
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    pub(crate) fn matches(&self, route: &Route) -> bool {
        field_matches(&self.service, &route.service)
            && field_matches(&self.address, &route.address)
            && field_matches(&self.gateway, &route.gateway)
            && field_matches(&self.router, &route.router)
            && field_matches(&self.network, &route.network)
            && field_matches(&self.link, &route.link)
            && match self.strategy {
                Strategy::AdvertiseAll => true,
                Strategy::AdvertiseLocal => route.link == "local",
                Strategy::AdvertiseNone => false,
            }
    }
}

fn field_matches(filter: &str, value: &str) -> bool {
    filter.is_empty() || filter == value
}

/// Advertising strategy (§4.7/§4.8): which routes a subscriber is shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    AdvertiseAll,
    AdvertiseLocal,
    AdvertiseNone,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::AdvertiseAll
    }
}

/// What happened to a route (§3 "Advertisement event").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Create,
    Update,
    Delete,
}

/// `{type, timestamp, route}` (§3). `timestamp` is milliseconds since the
/// unix epoch on the wire, so events from different processes can still be
/// ordered (§4.8 "Peer adverts" step 1: "Sort events by timestamp").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub timestamp: u64,
    pub route: Route,
}

/// Which kind of bundle an `Advert` carries (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertType {
    /// Full current-state snapshot, sent once when a subscriber attaches
    /// (§4.8 "Initial state is flushed as a single Announce advert").
    Announce,
    /// An incremental batch of dampened events, sent every tick.
    RouteUpdate,
}

/// `{id, type, ttl, timestamp, events[]}` (§3), the unit peer routers
/// exchange (§6 "Router protocol").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Advert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AdvertType,
    pub ttl_ms: u64,
    pub timestamp: u64,
    pub events: Vec<Event>,
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
