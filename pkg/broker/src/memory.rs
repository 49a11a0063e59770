use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::async_std::channel;
use common::async_std::sync::Mutex;
use common::async_std::task;
use common::errors::*;

use crate::broker::{Broker, Subscriber};
use crate::message::Message;

struct Entry {
    id: usize,
    topic_prefix: String,
    queue: Option<String>,
    sender: channel::Sender<Message>,
}

struct State {
    entries: Vec<Entry>,
    last_id: usize,
    /// Round-robin cursor per queue group name, so repeated publishes
    /// spread across the group's members instead of always hitting the
    /// first one registered.
    queue_cursors: HashMap<String, usize>,
}

/// In-process fanout `Broker`, keyed by topic prefix and sharing the
/// registration/cleanup-on-drop shape of `registry::Watchers` (itself
/// ported from the teacher's `datastore` meta `Watchers`).
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: vec![],
                last_id: 0,
                queue_cursors: HashMap::new(),
            })),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, message: Message) -> Result<()> {
        let mut state = self.state.lock().await;

        // Fanout subscribers (queue == None): every match gets a copy.
        for entry in &state.entries {
            if entry.queue.is_none() && topic.starts_with(&entry.topic_prefix) {
                let _ = entry.sender.send(message.clone()).await;
            }
        }

        // Queue-group subscribers: exactly one member per group name gets
        // this message, chosen round-robin among matching members.
        let mut groups: Vec<&str> = state
            .entries
            .iter()
            .filter(|e| e.queue.is_some() && topic.starts_with(&e.topic_prefix))
            .map(|e| e.queue.as_deref().unwrap())
            .collect();
        groups.sort_unstable();
        groups.dedup();

        for group in groups {
            let members: Vec<usize> = state
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.queue.as_deref() == Some(group) && topic.starts_with(&e.topic_prefix))
                .map(|(i, _)| i)
                .collect();
            if members.is_empty() {
                continue;
            }

            let cursor = state.queue_cursors.entry(group.to_string()).or_insert(0);
            let chosen = members[*cursor % members.len()];
            *cursor = cursor.wrapping_add(1);

            let _ = state.entries[chosen].sender.send(message.clone()).await;
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, queue: Option<&str>) -> Result<Box<dyn Subscriber>> {
        let mut state = self.state.lock().await;

        let id = state.last_id + 1;
        state.last_id = id;

        let (sender, receiver) = channel::unbounded();
        state.entries.push(Entry {
            id,
            topic_prefix: topic.to_string(),
            queue: queue.map(String::from),
            sender,
        });

        Ok(Box::new(MemorySubscriber {
            state: self.state.clone(),
            id,
            receiver,
        }))
    }
}

struct MemorySubscriber {
    state: Arc<Mutex<State>>,
    id: usize,
    receiver: channel::Receiver<Message>,
}

impl MemorySubscriber {
    async fn remove(&self) {
        let mut state = self.state.lock().await;
        if let Some(i) = state.entries.iter().position(|e| e.id == self.id) {
            state.entries.swap_remove(i);
        }
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        let state = self.state.clone();
        let id = self.id;
        task::spawn(async move {
            let mut state = state.lock().await;
            if let Some(i) = state.entries.iter().position(|e| e.id == id) {
                state.entries.swap_remove(i);
            }
        });
    }
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    async fn next(&self) -> Result<Option<Message>> {
        match self.receiver.recv().await {
            Ok(msg) => Ok(Some(msg)),
            Err(_) => Ok(None),
        }
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.remove().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(topic: &str) -> Message {
        Message {
            topic: topic.to_string(),
            metadata: HashMap::new(),
            body: bytes::Bytes::from_static(b"hi"),
        }
    }

    #[async_std::test]
    async fn fanout_subscribers_all_receive_the_message() {
        let broker = MemoryBroker::new();
        let a = broker.subscribe("events", None).await.unwrap();
        let b = broker.subscribe("events", None).await.unwrap();

        broker.publish("events", msg("events")).await.unwrap();

        assert!(a.next().await.unwrap().is_some());
        assert!(b.next().await.unwrap().is_some());
    }

    #[async_std::test]
    async fn topic_prefix_matching_scopes_delivery() {
        let broker = MemoryBroker::new();
        let sub = broker.subscribe("events.orders", None).await.unwrap();

        broker.publish("events.users", msg("events.users")).await.unwrap();
        broker
            .publish("events.orders.created", msg("events.orders.created"))
            .await
            .unwrap();

        let got = sub.next().await.unwrap().unwrap();
        assert_eq!(got.topic, "events.orders.created");
    }

    #[async_std::test]
    async fn queue_group_delivers_to_exactly_one_member() {
        let broker = MemoryBroker::new();
        let a = broker.subscribe("jobs", Some("workers")).await.unwrap();
        let b = broker.subscribe("jobs", Some("workers")).await.unwrap();

        broker.publish("jobs", msg("jobs")).await.unwrap();
        broker.publish("jobs", msg("jobs")).await.unwrap();

        // Each of the two publishes should land on exactly one subscriber;
        // across both, both subscribers together see exactly two messages.
        let mut total = 0;
        if async_std::future::timeout(std::time::Duration::from_millis(20), a.next())
            .await
            .ok()
            .flatten()
            .flatten()
            .is_some()
        {
            total += 1;
        }
        if async_std::future::timeout(std::time::Duration::from_millis(20), b.next())
            .await
            .ok()
            .flatten()
            .flatten()
            .is_some()
        {
            total += 1;
        }
        assert_eq!(total, 2);
    }

    #[async_std::test]
    async fn unsubscribe_stops_further_delivery() {
        let broker = MemoryBroker::new();
        let sub = broker.subscribe("topic", None).await.unwrap();
        sub.unsubscribe().await.unwrap();

        broker.publish("topic", msg("topic")).await.unwrap();

        let result = async_std::future::timeout(std::time::Duration::from_millis(20), sub.next()).await;
        assert!(result.is_err(), "expected no message after unsubscribe");
    }
}
