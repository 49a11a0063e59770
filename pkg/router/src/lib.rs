//! Distributed routing table and advert protocol (§4.7, §4.8): maps
//! `(service, network)` to a set of weighted routes, derived from the
//! local service registry and from peer adverts, with event-driven
//! advertisement suppression for flapping routes.

mod model;
mod peer;
mod router;
mod table;

pub use model::{
    now_millis, Advert, AdvertType, Event, EventType, Query, Route, Strategy, DEFAULT_LOCAL_METRIC,
    METRIC_UNREACHABLE, WILDCARD,
};
pub use peer::{PeerClient, PeerServer};
pub use router::{AdvertWatch, DefaultRouter, Router, ADVERTISE_EVENTS_TICK};
pub use table::{DefaultTable, Table, TableWatch};
