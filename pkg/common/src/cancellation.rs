use std::sync::Arc;
use std::time::{Duration, Instant};

use async_std::channel;
use async_std::future::timeout;
use async_trait::async_trait;

/// Something that can be awaited to find out when an operation should stop.
///
/// Every suspending call in the mesh (transport I/O, registry watches,
/// broker receives) takes a `&dyn CancellationToken` so that cancellation
/// is explicit rather than carried in a hidden thread-local, per the
/// framework's "context-carried metadata" design note.
#[async_trait]
pub trait CancellationToken: 'static + Send + Sync {
    async fn wait(&self);

    fn is_cancelled(&self) -> bool;
}

/// A token that never fires. Used as the default when a caller doesn't
/// supply a deadline.
pub struct Never;

#[async_trait]
impl CancellationToken for Never {
    async fn wait(&self) {
        std::future::pending::<()>().await;
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

struct Shared {
    sender: channel::Sender<()>,
    receiver: channel::Receiver<()>,
}

/// A manually-triggered cancellation token, cloneable, with at-most-once
/// firing semantics. This is what `Client::Call`'s `ctx` deadline and the
/// server's per-request handler context are built from.
#[derive(Clone)]
pub struct CancellationHandle {
    shared: Arc<Shared>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (sender, receiver) = channel::bounded(1);
        Self {
            shared: Arc::new(Shared { sender, receiver }),
        }
    }

    /// Builds a token that fires either when `cancel()` is called or after
    /// `deadline` elapses, whichever comes first.
    pub fn with_deadline(deadline: Duration) -> Self {
        let handle = Self::new();
        let inner = handle.clone();
        async_std::task::spawn(async move {
            let _ = timeout(deadline, inner.shared.receiver.recv()).await;
            inner.cancel();
        });
        handle
    }

    pub fn cancel(&self) {
        let _ = self.shared.sender.try_send(());
    }
}

#[async_trait]
impl CancellationToken for CancellationHandle {
    async fn wait(&self) {
        // recv() on a closed/already-fired channel resolves immediately,
        // so this is safe to call repeatedly and from multiple waiters.
        let _ = self.shared.receiver.recv().await;
        // Leave a token in the channel for the next waiter in case this
        // instance's `sender` has already been dropped elsewhere.
        let _ = self.shared.sender.try_send(());
    }

    fn is_cancelled(&self) -> bool {
        !self.shared.receiver.is_empty() || self.shared.sender.is_closed()
    }
}

/// Runs `fut` to completion or returns `Err` once `token` fires first.
pub async fn race_cancellation<T, F: std::future::Future<Output = T>>(
    token: &dyn CancellationToken,
    fut: F,
) -> Result<T, Cancelled> {
    use futures::future::{select, Either};

    futures::pin_mut!(fut);
    let cancelled = token.wait();
    futures::pin_mut!(cancelled);

    match select(fut, cancelled).await {
        Either::Left((v, _)) => Ok(v),
        Either::Right((_, _)) => Err(Cancelled),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Cancelled;

/// Marks elapsed time since creation, used by `ExponentialBackoff` and TTL
/// sweeps alike.
pub fn now() -> Instant {
    Instant::now()
}
