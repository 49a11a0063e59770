use std::collections::HashMap;
use std::sync::Arc;

use async_std::channel;
use async_std::sync::Mutex;
use async_trait::async_trait;
use common::errors::*;

use crate::socket::{DialOptions, Listener, Message, Socket, Transport};

/// A transport that never leaves the process: `dial(addr)` only succeeds
/// if some `listen(addr)` is still registered. Used for unit/integration
/// tests and for colocated services that want to skip the network stack
/// entirely.
#[derive(Clone)]
pub struct InMemoryTransport {
    listeners: Arc<Mutex<HashMap<String, channel::Sender<PendingConnection>>>>,
}

struct PendingConnection {
    remote_address: String,
    socket: InMemorySocket,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>> {
        let mut listeners = self.listeners.lock().await;
        if listeners.contains_key(addr) {
            return Err(Error::new(
                Kind::InternalServerError,
                format!("address already in use: {}", addr),
            ));
        }

        let (sender, receiver) = channel::unbounded();
        listeners.insert(addr.to_string(), sender);

        Ok(Box::new(InMemoryListener {
            address: addr.to_string(),
            receiver,
            listeners: self.listeners.clone(),
        }))
    }

    async fn dial(&self, addr: &str, _opts: DialOptions) -> Result<Box<dyn Socket>> {
        let sender = {
            let listeners = self.listeners.lock().await;
            listeners
                .get(addr)
                .cloned()
                .ok_or_else(|| Error::new(Kind::NotFound, format!("no listener at {}", addr)))?
        };

        let (client_tx, client_rx) = channel::unbounded();
        let (server_tx, server_rx) = channel::unbounded();

        let client_socket = InMemorySocket {
            remote_address: addr.to_string(),
            sender: client_tx,
            receiver: client_rx,
        };
        let server_socket = InMemorySocket {
            remote_address: "in-memory-client".to_string(),
            sender: server_tx,
            receiver: server_rx,
        };

        sender
            .send(PendingConnection {
                remote_address: addr.to_string(),
                socket: server_socket,
            })
            .await
            .map_err(|_| Error::new(Kind::NotFound, format!("listener at {} went away", addr)))?;

        Ok(Box::new(client_socket))
    }
}

struct InMemoryListener {
    address: String,
    receiver: channel::Receiver<PendingConnection>,
    listeners: Arc<Mutex<HashMap<String, channel::Sender<PendingConnection>>>>,
}

#[async_trait]
impl Listener for InMemoryListener {
    async fn accept(&self) -> Result<Box<dyn Socket>> {
        let conn = self
            .receiver
            .recv()
            .await
            .map_err(|_| Error::new(Kind::Shutdown, "listener closed"))?;
        let _ = &conn.remote_address;
        Ok(Box::new(conn.socket))
    }

    fn local_address(&self) -> String {
        self.address.clone()
    }
}

impl Drop for InMemoryListener {
    fn drop(&mut self) {
        let listeners = self.listeners.clone();
        let address = self.address.clone();
        async_std::task::spawn(async move {
            listeners.lock().await.remove(&address);
        });
    }
}

#[derive(Clone)]
struct InMemorySocket {
    remote_address: String,
    sender: channel::Sender<Message>,
    receiver: channel::Receiver<Message>,
}

#[async_trait]
impl Socket for InMemorySocket {
    async fn send(&self, message: Message) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| Error::new(Kind::Shutdown, "peer socket closed"))
    }

    async fn recv(&self) -> Result<Option<Message>> {
        match self.receiver.recv().await {
            Ok(msg) => Ok(Some(msg)),
            Err(_) => Ok(None),
        }
    }

    async fn close(&self) -> Result<()> {
        self.sender.close();
        Ok(())
    }

    fn remote_address(&self) -> String {
        self.remote_address.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn dial_without_a_listener_fails_not_found() {
        let transport = InMemoryTransport::new();
        let err = transport
            .dial("svc://nowhere", DialOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Kind::NotFound);
    }

    #[async_std::test]
    async fn messages_flow_both_ways() {
        let transport = InMemoryTransport::new();
        let listener = transport.listen("svc://echo").await.unwrap();

        let server_task = async_std::task::spawn(async move {
            let socket = listener.accept().await.unwrap();
            let msg = socket.recv().await.unwrap().unwrap();
            socket.send(msg).await.unwrap();
        });

        let client = transport
            .dial("svc://echo", DialOptions::default())
            .await
            .unwrap();

        let mut headers = HashMap::new();
        headers.insert("Vine-Service".to_string(), "echo".to_string());
        client
            .send(Message {
                headers,
                body: b"hello".to_vec().into(),
            })
            .await
            .unwrap();

        let reply = client.recv().await.unwrap().unwrap();
        assert_eq!(reply.body.as_ref(), b"hello");

        server_task.await;
    }

    #[async_std::test]
    async fn second_listen_on_same_address_fails() {
        let transport = InMemoryTransport::new();
        let _l1 = transport.listen("svc://dup").await.unwrap();
        let err = transport.listen("svc://dup").await.unwrap_err();
        assert_eq!(err.kind(), Kind::InternalServerError);
    }
}
