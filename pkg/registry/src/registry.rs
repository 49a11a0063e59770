use async_trait::async_trait;
use common::errors::*;

use crate::model::{RegisterOptions, Service, WatchEvent};

/// A handle to a live `Watch` subscription. Closing/dropping it stops
/// delivery; see `crate::watchers` for the in-process implementation.
#[async_trait]
pub trait Watch: Send + Sync {
    async fn recv(&self) -> Result<WatchEvent>;
}

/// The service discovery abstraction (§4.3). Every operation is scoped by
/// `domain` (the tenant namespace); pass `""` for the default domain.
#[async_trait]
pub trait Registry: Send + Sync {
    /// At-least-once visible within one gossip interval; re-registering
    /// the same `(domain, name, version, nodeId)` refreshes the TTL rather
    /// than creating a duplicate.
    async fn register(&self, domain: &str, service: Service, opts: RegisterOptions) -> Result<()>;

    /// Eventually removes the service's nodes. A concurrent
    /// register+deregister resolves in wall-clock order.
    async fn deregister(&self, domain: &str, service: Service) -> Result<()>;

    /// All versions of the named service. `Kind::NotFound` if none exist.
    async fn get_service(&self, domain: &str, name: &str) -> Result<Vec<Service>>;

    /// Every service known in `domain`. May include stale entries up to
    /// one TTL (eventual consistency, no strong read guarantee).
    async fn list_services(&self, domain: &str) -> Result<Vec<Service>>;

    /// Subscribes to create/update/delete events, optionally filtered to
    /// one service name. Events are monotonic per `(name, version, node
    /// id)`: a delete can never be observed before its matching create
    /// within one subscription.
    async fn watch(&self, domain: &str, service_filter: Option<&str>) -> Result<Box<dyn Watch>>;
}
