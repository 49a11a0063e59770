use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::async_std::sync::Mutex;
use common::errors::*;
use common::task::ChildTask;

use crate::model::{namespaced_key, Action, RegisterOptions, Service, WatchEvent};
use crate::registry::{Registry, Watch};
use crate::watchers::Watchers;

/// How often the TTL sweep runs. Shorter than the smallest sane
/// `RegisterOptions::ttl` so expirations are never more than one sweep
/// period late.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

struct Entry {
    service: Service,
    /// One per `(nodeId)` that registered under this `(domain, name,
    /// version)` key, so a TTL refresh on one node doesn't affect another.
    node_expiry: HashMap<String, Instant>,
}

/// Map key: `(namespaced_key(domain, name), version)`. Version is part of
/// the key because a Service's identity for equality is `(name, version)`
/// (§3) — two versions of the same name must coexist rather than one
/// overwriting the other.
type Key = (String, String);

struct Shared {
    state: Mutex<HashMap<Key, Entry>>,
    watchers: Watchers,
}

/// In-process `Registry` (§4.3 back-end (a)): a map guarded by a mutex plus
/// a periodic TTL sweep task, with change notification fanned out through
/// `Watchers` (grounded on the teacher's datastore meta watcher pattern).
pub struct MemoryRegistry {
    shared: Arc<Shared>,
    _sweeper: ChildTask,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(HashMap::new()),
            watchers: Watchers::new(),
        });

        let sweeper = ChildTask::spawn(Self::sweep_loop(shared.clone()));

        Self {
            shared,
            _sweeper: sweeper,
        }
    }

    async fn sweep_loop(shared: Arc<Shared>) {
        loop {
            common::async_std::task::sleep(SWEEP_INTERVAL).await;
            Self::sweep_once(&shared).await;
        }
    }

    async fn sweep_once(shared: &Arc<Shared>) {
        let now = Instant::now();
        let mut expired_events = vec![];

        {
            let mut state = shared.state.lock().await;
            let mut dead_keys = vec![];

            for (key, entry) in state.iter_mut() {
                let expired_nodes: Vec<String> = entry
                    .node_expiry
                    .iter()
                    .filter(|(_, expiry)| **expiry <= now)
                    .map(|(id, _)| id.clone())
                    .collect();

                if expired_nodes.is_empty() {
                    continue;
                }

                for id in &expired_nodes {
                    entry.node_expiry.remove(id);
                    entry.service.nodes.retain(|n| &n.id != id);
                }

                if entry.service.nodes.is_empty() {
                    dead_keys.push(key.clone());
                    expired_events.push(WatchEvent {
                        action: Action::Delete,
                        service: entry.service.clone(),
                    });
                } else {
                    expired_events.push(WatchEvent {
                        action: Action::Update,
                        service: entry.service.clone(),
                    });
                }
            }

            for key in dead_keys {
                state.remove(&key);
            }
        }

        for event in expired_events {
            shared.watchers.broadcast(&event).await;
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, domain: &str, service: Service, opts: RegisterOptions) -> Result<()> {
        if service.nodes.is_empty() {
            return Err(Error::new(
                Kind::BadRequest,
                "cannot register a service with no nodes",
            ));
        }
        for node in &service.nodes {
            if node.id.is_empty() {
                return Err(Error::new(Kind::BadRequest, "node id must be non-empty"));
            }
            if node.address.is_empty() {
                return Err(Error::new(Kind::BadRequest, "node address must be non-empty"));
            }
        }

        let key: Key = (namespaced_key(domain, &service.name), service.version.clone());
        let expiry = Instant::now() + opts.ttl;

        let (event, event_action) = {
            let mut state = self.shared.state.lock().await;

            match state.get_mut(&key) {
                Some(entry) => {
                    entry.service.merge(service.clone());
                    for node in &service.nodes {
                        entry.node_expiry.insert(node.id.clone(), expiry);
                    }
                    (entry.service.clone(), Action::Update)
                }
                None => {
                    let mut node_expiry = HashMap::new();
                    for node in &service.nodes {
                        node_expiry.insert(node.id.clone(), expiry);
                    }
                    let entry = Entry {
                        service: service.clone(),
                        node_expiry,
                    };
                    let cloned = entry.service.clone();
                    state.insert(key.clone(), entry);
                    (cloned, Action::Create)
                }
            }
        };

        self.shared
            .watchers
            .broadcast(&WatchEvent {
                action: event_action,
                service: event,
            })
            .await;

        Ok(())
    }

    async fn deregister(&self, domain: &str, service: Service) -> Result<()> {
        let key: Key = (namespaced_key(domain, &service.name), service.version.clone());
        let node_ids: Vec<String> = service.nodes.iter().map(|n| n.id.clone()).collect();

        let event = {
            let mut state = self.shared.state.lock().await;
            let entry = match state.get_mut(&key) {
                Some(e) => e,
                None => return Ok(()),
            };

            if node_ids.is_empty() {
                let removed = state.remove(&key).unwrap();
                Some(WatchEvent {
                    action: Action::Delete,
                    service: removed.service,
                })
            } else {
                entry.service.nodes.retain(|n| !node_ids.contains(&n.id));
                for id in &node_ids {
                    entry.node_expiry.remove(id);
                }

                if entry.service.nodes.is_empty() {
                    let removed = state.remove(&key).unwrap();
                    Some(WatchEvent {
                        action: Action::Delete,
                        service: removed.service,
                    })
                } else {
                    Some(WatchEvent {
                        action: Action::Update,
                        service: entry.service.clone(),
                    })
                }
            }
        };

        if let Some(event) = event {
            self.shared.watchers.broadcast(&event).await;
        }

        Ok(())
    }

    async fn get_service(&self, domain: &str, name: &str) -> Result<Vec<Service>> {
        let key = namespaced_key(domain, name);
        let state = self.shared.state.lock().await;
        let services: Vec<Service> = state
            .iter()
            .filter(|((k, _), _)| k == &key)
            .map(|(_, entry)| entry.service.clone())
            .collect();

        if services.is_empty() {
            Err(Error::new(Kind::NotFound, format!("service {} not found", name)))
        } else {
            Ok(services)
        }
    }

    async fn list_services(&self, domain: &str) -> Result<Vec<Service>> {
        let prefix = if domain.is_empty() {
            String::new()
        } else {
            format!("{}/", domain)
        };

        let state = self.shared.state.lock().await;
        Ok(state
            .iter()
            .filter(|((key, _), _)| {
                if domain.is_empty() {
                    !key.contains('/')
                } else {
                    key.starts_with(&prefix)
                }
            })
            .map(|(_, entry)| entry.service.clone())
            .collect())
    }

    async fn watch(&self, _domain: &str, service_filter: Option<&str>) -> Result<Box<dyn Watch>> {
        Ok(self
            .shared
            .watchers
            .register(service_filter.map(String::from))
            .await)
    }
}
