use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use async_std::sync::Mutex;
use async_trait::async_trait;
use common::errors::*;
use net::backoff::{ExponentialBackoff, ExponentialBackoffOptions};
use registry::{Node, Registry};

use crate::next::{ListNext, Next};
use crate::policy::Policy;

/// Tracks a node's health for one service. Failure marks decay via the
/// same exponential-backoff shape the client's own retry loop uses
/// (§4.4 "Failure marks decay with exponential back-off").
struct Health {
    backoff: ExponentialBackoff,
    excluded_until: Option<Instant>,
}

impl Health {
    fn new() -> Self {
        Self {
            backoff: ExponentialBackoff::new(ExponentialBackoffOptions::default()),
            excluded_until: None,
        }
    }

    fn is_excluded(&self, now: Instant) -> bool {
        matches!(self.excluded_until, Some(t) if t > now)
    }

    fn mark(&mut self, failed: bool) {
        self.backoff.end_attempt(!failed);
        if failed {
            self.excluded_until = Some(Instant::now() + self.backoff.current());
        } else {
            self.excluded_until = None;
        }
    }
}

/// Picks nodes for a target service (§4.4). Consults the `Registry`
/// (callers are free to front it with a caching decorator of their own),
/// excludes recently-failing nodes, and orders the rest per `Policy`.
///
/// When `proxy` addresses are configured, the registry is bypassed
/// entirely and `select` returns those addresses round-robin instead —
/// the "single logical hop" case referenced by §4.5's note that retries
/// are disabled when a proxy is in effect.
pub struct DefaultSelector {
    registry: Arc<dyn Registry>,
    policy: Policy,
    health: Mutex<HashMap<(String, String), Health>>,
    round_robin_cursor: AtomicUsize,
    proxy: Option<Vec<String>>,
}

impl DefaultSelector {
    pub fn new(registry: Arc<dyn Registry>, policy: Policy) -> Self {
        Self {
            registry,
            policy,
            health: Mutex::new(HashMap::new()),
            round_robin_cursor: AtomicUsize::new(0),
            proxy: None,
        }
    }

    pub fn with_proxy(registry: Arc<dyn Registry>, policy: Policy, addresses: Vec<String>) -> Self {
        Self {
            registry,
            policy,
            health: Mutex::new(HashMap::new()),
            round_robin_cursor: AtomicUsize::new(0),
            proxy: Some(addresses),
        }
    }

    async fn healthy_nodes(&self, service: &str) -> Result<Vec<Node>> {
        let services = self.registry.get_service("", service).await?;
        let now = Instant::now();
        let health = self.health.lock().await;

        let mut nodes = vec![];
        for s in services {
            for node in s.nodes {
                let key = (service.to_string(), node.id.clone());
                if health.get(&key).map(|h| h.is_excluded(now)).unwrap_or(false) {
                    continue;
                }
                nodes.push(node);
            }
        }
        Ok(nodes)
    }
}

#[async_trait]
pub trait Selector: Send + Sync {
    async fn select(&self, service: &str) -> Result<Box<dyn Next>>;

    async fn mark(&self, service: &str, node_id: &str, failed: bool);

    /// Whether this selector is bypassing the registry for a configured
    /// proxy address (§4.4 "proxy hook"). `Client` consults this to
    /// collapse retries to a single attempt (§4.5 "Retries are disabled
    /// automatically when a proxy address is in effect").
    fn is_proxied(&self) -> bool;
}

#[async_trait]
impl Selector for DefaultSelector {
    async fn select(&self, service: &str) -> Result<Box<dyn Next>> {
        if let Some(addresses) = &self.proxy {
            if addresses.is_empty() {
                return Err(Error::new(Kind::NotFound, "no proxy addresses configured"));
            }
            let cursor = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed);
            let mut nodes: Vec<Node> = addresses
                .iter()
                .enumerate()
                .map(|(i, addr)| Node {
                    id: format!("proxy-{}", i),
                    address: addr.clone(),
                    metadata: HashMap::new(),
                })
                .collect();
            Policy::RoundRobin.order(&mut nodes, cursor);
            return Ok(Box::new(ListNext::new(nodes)));
        }

        let mut nodes = self.healthy_nodes(service).await?;
        if nodes.is_empty() {
            return Err(Error::new(
                Kind::NotFound,
                format!("no healthy nodes for service {}", service),
            ));
        }

        let cursor = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed);
        self.policy.order(&mut nodes, cursor);
        Ok(Box::new(ListNext::new(nodes)))
    }

    async fn mark(&self, service: &str, node_id: &str, failed: bool) {
        if self.proxy.is_some() {
            return;
        }
        let mut health = self.health.lock().await;
        health
            .entry((service.to_string(), node_id.to_string()))
            .or_insert_with(Health::new)
            .mark(failed);
    }

    fn is_proxied(&self) -> bool {
        self.proxy.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry::{MemoryRegistry, RegisterOptions, Service};
    use std::time::Duration;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            address: format!("127.0.0.1:{}", 9000),
            metadata: HashMap::new(),
        }
    }

    async fn registry_with(service: &str, node_ids: &[&str]) -> Arc<MemoryRegistry> {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .register(
                "",
                Service {
                    name: service.to_string(),
                    version: "1.0.0".to_string(),
                    nodes: node_ids.iter().map(|id| node(id)).collect(),
                    ..Default::default()
                },
                RegisterOptions::default(),
            )
            .await
            .unwrap();
        registry
    }

    #[async_std::test]
    async fn selects_among_registered_nodes() {
        let registry = registry_with("foo.bar", &["a", "b"]).await;
        let selector = DefaultSelector::new(registry, Policy::RoundRobin);

        let mut next = selector.select("foo.bar").await.unwrap();
        let first = next.next().unwrap();
        assert!(first.id == "a" || first.id == "b");
    }

    #[async_std::test]
    async fn marking_a_node_as_failed_excludes_it_temporarily() {
        let registry = registry_with("foo.bar", &["a", "b"]).await;
        let selector = DefaultSelector::new(registry, Policy::RoundRobin);

        selector.mark("foo.bar", "a", true).await;

        let mut next = selector.select("foo.bar").await.unwrap();
        let mut seen = vec![];
        while let Some(n) = next.next() {
            seen.push(n.id);
        }
        assert_eq!(seen, vec!["b".to_string()]);
    }

    #[async_std::test]
    async fn no_healthy_nodes_is_not_found() {
        let registry = Arc::new(MemoryRegistry::new());
        let selector = DefaultSelector::new(registry, Policy::Random);

        let err = selector.select("missing.svc").await.unwrap_err();
        assert_eq!(err.kind(), Kind::NotFound);
    }

    #[async_std::test]
    async fn proxy_hook_bypasses_the_registry() {
        let registry = Arc::new(MemoryRegistry::new());
        let selector = DefaultSelector::with_proxy(
            registry,
            Policy::RoundRobin,
            vec!["10.0.0.1:9000".to_string()],
        );

        assert!(selector.is_proxied());
        let mut next = selector.select("anything").await.unwrap();
        let n = next.next().unwrap();
        assert_eq!(n.address, "10.0.0.1:9000");
    }

    #[async_std::test]
    async fn successful_mark_clears_exclusion() {
        let registry = registry_with("foo.bar", &["a"]).await;
        let selector = DefaultSelector::new(registry, Policy::Random);

        selector.mark("foo.bar", "a", true).await;
        selector.mark("foo.bar", "a", false).await;

        let mut next = selector.select("foo.bar").await.unwrap();
        assert!(next.next().is_some());
        let _ = Duration::from_secs(0);
    }
}
