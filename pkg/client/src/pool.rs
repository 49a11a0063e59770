use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::async_std::sync::Mutex;
use common::errors::*;
use common::task::ChildTask;
use transport::{DialOptions, Socket, Transport};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct IdleSocket {
    socket: Box<dyn Socket>,
    idle_since: Instant,
}

struct Shared {
    transport: Arc<dyn Transport>,
    pool_ttl: Duration,
    idle: Mutex<HashMap<String, Vec<IdleSocket>>>,
}

/// Reuses idle sockets to the same address within `poolTTL` (§4.5 step
/// 3c). A background sweep evicts sockets that sat idle too long; a
/// socket touched by a cancelled call is never returned here (the caller
/// simply drops it).
pub struct ConnectionPool {
    shared: Arc<Shared>,
    _sweeper: ChildTask,
}

impl ConnectionPool {
    pub fn new(transport: Arc<dyn Transport>, pool_ttl: Duration) -> Self {
        let shared = Arc::new(Shared {
            transport,
            pool_ttl,
            idle: Mutex::new(HashMap::new()),
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
            let now = Instant::now();
            let mut idle = shared.idle.lock().await;
            for sockets in idle.values_mut() {
                sockets.retain(|s| now.duration_since(s.idle_since) < shared.pool_ttl);
            }
            idle.retain(|_, sockets| !sockets.is_empty());
        }
    }

    /// Returns a pooled idle socket to `address` if one is still within
    /// `poolTTL`, otherwise dials a new one.
    pub async fn acquire(&self, address: &str, opts: DialOptions) -> Result<Box<dyn Socket>> {
        {
            let mut idle = self.shared.idle.lock().await;
            if let Some(sockets) = idle.get_mut(address) {
                let now = Instant::now();
                while let Some(entry) = sockets.pop() {
                    if now.duration_since(entry.idle_since) < self.shared.pool_ttl {
                        return Ok(entry.socket);
                    }
                }
            }
        }

        self.shared.transport.dial(address, opts).await
    }

    /// Returns `socket` to the pool for future reuse. Never call this for
    /// a socket involved in a cancelled call (§5 "Cancellation").
    pub async fn release(&self, address: &str, socket: Box<dyn Socket>) {
        let mut idle = self.shared.idle.lock().await;
        idle.entry(address.to_string()).or_default().push(IdleSocket {
            socket,
            idle_since: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::InMemoryTransport;

    #[async_std::test]
    async fn acquire_dials_when_nothing_is_pooled() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let listener = transport.listen("svc://pooled").await.unwrap();
        let _accept_task = common::task::ChildTask::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let pool = ConnectionPool::new(transport, Duration::from_secs(5));
        let socket = pool.acquire("svc://pooled", DialOptions::default()).await;
        assert!(socket.is_ok());
    }

    #[async_std::test]
    async fn released_socket_is_reused() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let listener = transport.listen("svc://pooled2").await.unwrap();
        let _accept_task = common::task::ChildTask::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let pool = ConnectionPool::new(transport, Duration::from_secs(5));
        let socket = pool.acquire("svc://pooled2", DialOptions::default()).await.unwrap();
        let remote = socket.remote_address();
        pool.release("svc://pooled2", socket).await;

        let reused = pool.acquire("svc://pooled2", DialOptions::default()).await.unwrap();
        assert_eq!(reused.remote_address(), remote);
    }
}
