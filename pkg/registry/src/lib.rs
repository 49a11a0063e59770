//! Service discovery (§4.3): publish/look-up `Service` records, namespaced
//! by tenant domain, with a watch stream for change notification.
//!
//! Two back-ends share the `Registry` trait: `MemoryRegistry` (in-process,
//! TTL sweep) and `NetworkRegistry`/`NetworkRegistryServer` (relays to a
//! remote registry node over `transport`+`codec`).

mod memory;
mod model;
mod network;
mod registry;
mod watchers;

pub use memory::MemoryRegistry;
pub use model::{namespaced_key, Action, Endpoint, Node, RegisterOptions, Service, WatchEvent};
pub use network::{NetworkRegistry, NetworkRegistryServer};
pub use registry::{Registry, Watch};
pub use watchers::Watchers;
