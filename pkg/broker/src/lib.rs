//! Pub/sub messaging by topic (§4.10, a supplement: the distilled spec
//! names Broker as a leaf component but never gives it its own
//! subsection).
//!
//! `MemoryBroker` fans out in-process, keyed by topic prefix, with the
//! same registration/cleanup-on-drop shape as `registry::Watchers`.
//! `HttpBroker`/`HttpBrokerServer` relay over the same `transport`+`codec`
//! stack the RPC layer uses, mirroring the registry's memory/network
//! back-end split.

mod broker;
mod http;
mod memory;
mod message;

pub use broker::{Broker, Subscriber};
pub use http::{HttpBroker, HttpBrokerServer};
pub use memory::MemoryBroker;
pub use message::Message;
