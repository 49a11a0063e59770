use std::sync::Arc;

use async_trait::async_trait;
use common::async_std::channel;
use common::async_std::sync::Mutex;
use common::async_std::task;
use common::errors::*;

use crate::model::WatchEvent;
use crate::registry::Watch;

/// Fan-out registration table for registry watchers, ported from the
/// teacher's datastore meta `Watchers` (prefix-keyed subscriber list with
/// cleanup-on-drop), generalized from a byte-prefix key to an optional
/// service name filter.
pub struct Watchers {
    state: Arc<Mutex<WatchersState>>,
}

struct WatchersState {
    entries: Vec<WatcherEntry>,
    last_id: usize,
}

struct WatcherEntry {
    name_filter: Option<String>,
    id: usize,
    sender: channel::Sender<WatchEvent>,
}

impl Watchers {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(WatchersState {
                entries: vec![],
                last_id: 0,
            })),
        }
    }

    pub async fn register(&self, name_filter: Option<String>) -> Box<dyn Watch> {
        let mut state = self.state.lock().await;

        let id = state.last_id + 1;
        state.last_id = id;

        let (sender, receiver) = channel::unbounded();

        state.entries.push(WatcherEntry {
            name_filter,
            id,
            sender,
        });

        Box::new(WatcherRegistration {
            state: self.state.clone(),
            id,
            receiver,
        })
    }

    /// Delivers `event` to every watcher whose filter matches. Uses an
    /// unbounded channel per watcher so a slow consumer never blocks the
    /// write path that triggered the event.
    pub async fn broadcast(&self, event: &WatchEvent) {
        let state = self.state.lock().await;
        for entry in &state.entries {
            if let Some(filter) = &entry.name_filter {
                if filter != &event.service.name {
                    continue;
                }
            }
            let _ = entry.sender.send(event.clone()).await;
        }
    }
}

impl Default for Watchers {
    fn default() -> Self {
        Self::new()
    }
}

struct WatcherRegistration {
    state: Arc<Mutex<WatchersState>>,
    id: usize,
    receiver: channel::Receiver<WatchEvent>,
}

impl Drop for WatcherRegistration {
    fn drop(&mut self) {
        let state = self.state.clone();
        let id = self.id;
        task::spawn(async move {
            let mut state = state.lock().await;
            for i in 0..state.entries.len() {
                if state.entries[i].id == id {
                    state.entries.swap_remove(i);
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl Watch for WatcherRegistration {
    async fn recv(&self) -> Result<WatchEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|_| Error::new(Kind::WatcherStopped, "watch channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Service};

    fn event(name: &str, action: Action) -> WatchEvent {
        WatchEvent {
            action,
            service: Service {
                name: name.to_string(),
                ..Default::default()
            },
        }
    }

    #[async_std::test]
    async fn unfiltered_watcher_sees_every_event() {
        let watchers = Watchers::new();
        let watch = watchers.register(None).await;

        watchers.broadcast(&event("foo.bar", Action::Create)).await;
        let got = watch.recv().await.unwrap();
        assert_eq!(got.service.name, "foo.bar");
    }

    #[async_std::test]
    async fn filtered_watcher_ignores_other_services() {
        let watchers = Watchers::new();
        let watch = watchers.register(Some("foo.bar".to_string())).await;

        watchers.broadcast(&event("other.svc", Action::Create)).await;
        watchers.broadcast(&event("foo.bar", Action::Update)).await;

        let got = watch.recv().await.unwrap();
        assert_eq!(got.service.name, "foo.bar");
        assert_eq!(got.action, Action::Update);
    }

    #[async_std::test]
    async fn dropping_a_watch_stops_delivery() {
        let watchers = Watchers::new();
        let watch = watchers.register(None).await;
        drop(watch);

        // give the drop's cleanup task a chance to run
        async_std::task::sleep(std::time::Duration::from_millis(50)).await;

        let state = watchers.state.lock().await;
        assert_eq!(state.entries.len(), 0);
    }
}
