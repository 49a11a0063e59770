use async_trait::async_trait;
use common::errors::*;

use crate::message::Message;

/// A live subscription returned by `Broker::subscribe`. Unsubscribing is
/// implicit on drop (mirrors `registry::Watch`/the teacher's
/// `WatcherRegistration`); `unsubscribe` just makes it explicit and
/// synchronous.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn next(&self) -> Result<Option<Message>>;

    async fn unsubscribe(&self) -> Result<()>;
}

/// Publish/subscribe messaging by topic (§4.10).
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, message: Message) -> Result<()>;

    /// `queue` groups competing consumers: at most one subscriber sharing
    /// a queue name receives any given message. `None` fans the message
    /// out to every subscriber on the topic.
    async fn subscribe(&self, topic: &str, queue: Option<&str>) -> Result<Box<dyn Subscriber>>;
}
