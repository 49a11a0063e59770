use std::collections::HashMap;
use std::convert::TryInto;
use std::time::Duration;

use async_std::io::{ReadExt, WriteExt};
use async_std::net::{TcpListener, TcpStream};
use async_std::sync::Mutex;
use async_trait::async_trait;
use bytes::Bytes;
use common::errors::*;

use crate::socket::{DialOptions, Listener, Message, Socket, Transport};

const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Real-socket `Transport` backend. Frames are length-prefixed: a 4 byte
/// big-endian header length, the header as `serde_json`, then a 4 byte
/// big-endian body length and the raw body bytes. This is the transport's
/// own envelope, independent of whatever `Codec` produced the body.
#[derive(Clone, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::wrap(Kind::InternalServerError, e))?;
        let local_address = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());
        Ok(Box::new(TcpListenerHandle {
            listener,
            local_address,
        }))
    }

    async fn dial(&self, addr: &str, opts: DialOptions) -> Result<Box<dyn Socket>> {
        let connect = TcpStream::connect(addr);
        let stream = match opts.timeout {
            Some(d) => async_std::future::timeout(d, connect)
                .await
                .map_err(|_| Error::new(Kind::Timeout, format!("dial {} timed out", addr)))?
                .map_err(|e| Error::wrap(Kind::InternalServerError, e))?,
            None => connect
                .await
                .map_err(|e| Error::wrap(Kind::InternalServerError, e))?,
        };
        let remote_address = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());
        Ok(Box::new(TcpSocket {
            stream: Mutex::new(stream),
            remote_address,
        }))
    }
}

struct TcpListenerHandle {
    listener: TcpListener,
    local_address: String,
}

#[async_trait]
impl Listener for TcpListenerHandle {
    async fn accept(&self) -> Result<Box<dyn Socket>> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::wrap(Kind::InternalServerError, e))?;
        Ok(Box::new(TcpSocket {
            stream: Mutex::new(stream),
            remote_address: peer.to_string(),
        }))
    }

    fn local_address(&self) -> String {
        self.local_address.clone()
    }
}

struct TcpSocket {
    stream: Mutex<TcpStream>,
    remote_address: String,
}

#[async_trait]
impl Socket for TcpSocket {
    async fn send(&self, message: Message) -> Result<()> {
        let header_bytes = serde_json::to_vec(&message.headers)
            .map_err(|e| Error::wrap(Kind::BadRequest, e))?;
        if header_bytes.len() as u64 > MAX_FRAME_SIZE as u64 {
            return Err(Error::new(Kind::BadRequest, "header frame too large"));
        }
        if message.body.len() as u64 > MAX_FRAME_SIZE as u64 {
            return Err(Error::new(Kind::BadRequest, "body frame too large"));
        }

        let mut stream = self.stream.lock().await;
        stream
            .write_all(&(header_bytes.len() as u32).to_be_bytes())
            .await
            .map_err(|e| Error::wrap(Kind::Shutdown, e))?;
        stream
            .write_all(&header_bytes)
            .await
            .map_err(|e| Error::wrap(Kind::Shutdown, e))?;
        stream
            .write_all(&(message.body.len() as u32).to_be_bytes())
            .await
            .map_err(|e| Error::wrap(Kind::Shutdown, e))?;
        stream
            .write_all(&message.body)
            .await
            .map_err(|e| Error::wrap(Kind::Shutdown, e))?;
        stream.flush().await.map_err(|e| Error::wrap(Kind::Shutdown, e))?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Message>> {
        let mut stream = self.stream.lock().await;

        let header_len = match read_u32_or_eof(&mut stream).await? {
            Some(n) => n,
            None => return Ok(None),
        };
        check_frame_size(header_len)?;
        let mut header_buf = vec![0u8; header_len as usize];
        stream
            .read_exact(&mut header_buf)
            .await
            .map_err(|e| Error::wrap(Kind::Shutdown, e))?;
        let headers: HashMap<String, String> =
            serde_json::from_slice(&header_buf).map_err(|e| Error::wrap(Kind::BadRequest, e))?;

        let body_len = read_u32(&mut stream).await?;
        check_frame_size(body_len)?;
        let mut body_buf = vec![0u8; body_len as usize];
        stream
            .read_exact(&mut body_buf)
            .await
            .map_err(|e| Error::wrap(Kind::Shutdown, e))?;

        Ok(Some(Message {
            headers,
            body: Bytes::from(body_buf),
        }))
    }

    async fn close(&self) -> Result<()> {
        let stream = self.stream.lock().await;
        stream
            .shutdown(std::net::Shutdown::Both)
            .map_err(|e| Error::wrap(Kind::InternalServerError, e))
    }

    fn remote_address(&self) -> String {
        self.remote_address.clone()
    }
}

fn check_frame_size(len: u32) -> Result<()> {
    if len > MAX_FRAME_SIZE {
        return Err(Error::new(Kind::BadRequest, "frame exceeds max size"));
    }
    Ok(())
}

async fn read_u32(stream: &mut TcpStream) -> Result<u32> {
    let mut buf = [0u8; 4];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| Error::wrap(Kind::Shutdown, e))?;
    Ok(u32::from_be_bytes(buf))
}

/// Like `read_u32` but treats an immediate EOF (zero bytes read before the
/// peer closes) as `Ok(None)` instead of an error, matching `Socket::recv`'s
/// contract.
async fn read_u32_or_eof(stream: &mut TcpStream) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream
            .read(&mut buf[filled..])
            .await
            .map_err(|e| Error::wrap(Kind::Shutdown, e))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::new(Kind::Shutdown, "connection closed mid frame"));
        }
        filled += n;
    }
    Ok(Some(u32::from_be_bytes(buf.try_into().unwrap())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn round_trips_a_message_over_localhost() {
        let transport = TcpTransport::new();
        let listener = transport.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_address();

        let server = async_std::task::spawn(async move {
            let socket = listener.accept().await.unwrap();
            let msg = socket.recv().await.unwrap().unwrap();
            socket.send(msg).await.unwrap();
        });

        let client = transport.dial(&addr, DialOptions::default()).await.unwrap();
        let mut headers = HashMap::new();
        headers.insert("Vine-Method".to_string(), "Echo".to_string());
        client
            .send(Message {
                headers,
                body: Bytes::from_static(b"ping"),
            })
            .await
            .unwrap();

        let reply = client.recv().await.unwrap().unwrap();
        assert_eq!(reply.body.as_ref(), b"ping");
        assert_eq!(reply.headers.get("Vine-Method").map(String::as_str), Some("Echo"));

        server.await;
    }

    #[async_std::test]
    async fn dial_with_a_short_timeout_to_an_unroutable_address_fails() {
        let transport = TcpTransport::new();
        let result = transport
            .dial(
                "10.255.255.1:9",
                DialOptions {
                    stream: false,
                    timeout: Some(Duration::from_millis(1)),
                },
            )
            .await;
        assert!(result.is_err());
    }
}
