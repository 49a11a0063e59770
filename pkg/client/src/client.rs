use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use codec::{decode_body, encode_body, rewrite_for_backward_compatibility, Codec, CodecRegistry};
use common::cancellation::race_cancellation;
use common::errors::*;
use common::Context;
use transport::{DialOptions, Message, Socket, Transport};
use uuid_like::new_request_id;

use broker::{Broker, Message as BrokerMessage};
use selector::Selector;

use crate::model::{default_retry, CallOptions, Request, Response, RetryFn};
use crate::pool::ConnectionPool;
use crate::stream::Stream;

mod uuid_like {
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A process-unique, monotonically increasing request id. Good enough
    /// for `Vine-Id` correlation within one client's lifetime; real
    /// deployments would swap this for a proper UUID, but that pulls in a
    /// dependency this crate otherwise has no use for.
    pub fn new_request_id() -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{:x}-{:x}", std::time::Instant::now().elapsed().as_nanos() as u64, n)
    }
}

/// Composes Codec + Transport + Selector + Registry + Broker to issue
/// calls and stream RPCs (§2, §4.5).
pub struct Client {
    transport: Arc<dyn Transport>,
    selector: Arc<dyn Selector>,
    codecs: CodecRegistry,
    broker: Arc<dyn Broker>,
    pool: ConnectionPool,
    default_opts: CallOptions,
    retry: Arc<RetryFn>,
}

impl Client {
    pub fn new(
        transport: Arc<dyn Transport>,
        selector: Arc<dyn Selector>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            transport: transport.clone(),
            selector,
            codecs: CodecRegistry::standard(),
            broker,
            pool: ConnectionPool::new(transport, Duration::from_secs(60)),
            default_opts: CallOptions::default(),
            retry: Arc::new(default_retry),
        }
    }

    pub fn with_default_options(mut self, opts: CallOptions) -> Self {
        self.default_opts = opts;
        self
    }

    pub fn with_retry(mut self, retry: Arc<RetryFn>) -> Self {
        self.retry = retry;
        self
    }

    /// `Call(ctx, request, opts...)` (§4.5 steps 1-4).
    pub async fn call(&self, ctx: &Context, request: Request, opts: CallOptions) -> Result<Response> {
        let deadline_ctx = match opts.timeout {
            Some(d) => Context::with_timeout(d),
            None => ctx.clone(),
        };

        let mut next = self.selector.select(&request.service).await?;
        let is_proxied = self.is_proxied_for(&request.service).await;
        let max_attempts = if is_proxied { 1 } else { opts.retries.max(1) };

        let mut last_err: Option<Error> = None;

        for attempt in 0..max_attempts {
            if deadline_ctx.is_cancelled() {
                return Err(Error::new(Kind::Shutdown, "context cancelled before attempt"));
            }

            if attempt > 0 {
                let wait = backoff_for_attempt(attempt);
                common::async_std::task::sleep(wait).await;
            }

            let node = match next.next() {
                Some(n) => n,
                None => {
                    return Err(last_err.unwrap_or_else(|| Error::new(Kind::NotFound, "no node available")));
                }
            };

            let attempt_result = race_cancellation(
                deadline_ctx.cancellation(),
                self.attempt_once(&node, &request, opts.timeout),
            )
            .await;

            let result = match attempt_result {
                Ok(r) => r,
                Err(_cancelled) => {
                    self.selector.mark(&request.service, &node.id, false).await;
                    let kind = if opts.timeout.is_some() { Kind::Timeout } else { Kind::Shutdown };
                    return Err(Error::new(kind, "call cancelled before a response arrived"));
                }
            };

            match result {
                Ok(response) => {
                    self.selector.mark(&request.service, &node.id, true).await;
                    return Ok(response);
                }
                Err(err) => {
                    self.selector.mark(&request.service, &node.id, false).await;

                    let (should_retry, fatal) = (self.retry)(&deadline_ctx, &request, attempt, &err);
                    if let Some(fatal) = fatal {
                        return Err(fatal);
                    }
                    if !should_retry {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::new(Kind::InternalServerError, "exhausted retries")))
    }

    async fn is_proxied_for(&self, _service: &str) -> bool {
        self.selector.is_proxied()
    }

    async fn attempt_once(&self, node: &registry::Node, request: &Request, timeout: Option<Duration>) -> Result<Response> {
        let content_type = rewrite_for_backward_compatibility(&request.content_type, node.protocol());
        let codec = self.codecs.get(&content_type)?;

        let socket = self.pool.acquire(&node.address, DialOptions::default()).await?;

        let mut headers = HashMap::new();
        headers.insert("Vine-Id".to_string(), new_request_id());
        headers.insert("Vine-Service".to_string(), request.service.clone());
        headers.insert("Vine-Method".to_string(), request.method.clone());
        headers.insert("Vine-Endpoint".to_string(), request.endpoint.clone());
        headers.insert("Content-Type".to_string(), content_type.clone());
        if let Some(timeout) = timeout {
            // Wire format carries the deadline in nanoseconds (§6); the
            // server turns this back into its own per-request `Context`
            // deadline so a cancelled client call cancels the handler too.
            headers.insert("Timeout".to_string(), timeout.as_nanos().to_string());
        }

        let send_result = socket
            .send(Message {
                headers,
                body: encode_body(codec.as_ref(), &request.body)?.into(),
            })
            .await;

        if let Err(e) = send_result {
            return Err(e);
        }

        let response = match socket.recv().await {
            Ok(Some(m)) => m,
            Ok(None) => return Err(Error::new(Kind::Shutdown, "peer closed connection before responding")),
            Err(e) => return Err(e),
        };

        if let Some(err) = response.header("Vine-Error") {
            return Err(Error::new(Kind::InternalServerError, err.to_string()));
        }

        let body = decode_body(codec.as_ref(), &response.body)?;

        self.pool.release(&node.address, socket).await;

        Ok(Response { body })
    }

    /// `Stream(ctx, request)` (§4.5 "Streaming"): selects a node the same
    /// way `call` does but keeps the socket for the stream's lifetime
    /// instead of pooling it.
    pub async fn stream(&self, _ctx: &Context, request: Request) -> Result<Stream> {
        let mut next = self.selector.select(&request.service).await?;
        let node = next
            .next()
            .ok_or_else(|| Error::new(Kind::NotFound, format!("no node available for {}", request.service)))?;

        let content_type = rewrite_for_backward_compatibility(&request.content_type, node.protocol());
        let codec: Arc<dyn Codec> = self.codecs.get(&content_type)?;

        let socket = self
            .transport
            .dial(
                &node.address,
                DialOptions {
                    stream: true,
                    timeout: None,
                },
            )
            .await?;

        let stream_id = new_request_id();
        let mut headers = HashMap::new();
        headers.insert("Vine-Id".to_string(), new_request_id());
        headers.insert("Vine-Service".to_string(), request.service.clone());
        headers.insert("Vine-Method".to_string(), request.method.clone());
        headers.insert("Vine-Endpoint".to_string(), request.endpoint.clone());
        headers.insert("Vine-Stream".to_string(), stream_id.clone());
        headers.insert("Content-Type".to_string(), content_type.clone());

        socket
            .send(Message {
                headers,
                body: encode_body(codec.as_ref(), &request.body)?.into(),
            })
            .await?;

        Ok(Stream::new(socket, codec, request.service, request.method, stream_id))
    }

    /// `Publish(ctx, msg)` (§4.5 "Publish"): forwards to the broker under
    /// the configured topic.
    pub async fn publish(&self, _ctx: &Context, topic: &str, message: BrokerMessage) -> Result<()> {
        self.broker.publish(topic, message).await
    }
}

/// `backoff(i) = i² × 100ms`, capped at 30s (§4.5 step 3a default).
fn backoff_for_attempt(attempt: usize) -> Duration {
    let millis = (attempt as u64).saturating_mul(attempt as u64).saturating_mul(100);
    Duration::from_millis(millis).min(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::MemoryBroker;
    use registry::{MemoryRegistry, Node, RegisterOptions, Registry, Service};
    use selector::{DefaultSelector, Policy};
    use serde_json::json;
    use transport::InMemoryTransport;

    #[test]
    fn backoff_grows_quadratically_and_caps() {
        assert_eq!(backoff_for_attempt(0), Duration::from_millis(0));
        assert_eq!(backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff_for_attempt(2), Duration::from_millis(400));
        assert_eq!(backoff_for_attempt(100), Duration::from_secs(30));
    }

    /// Minimal hand-rolled echo responder standing in for the `server`
    /// crate (not yet in the picture here): decodes a JSON request body
    /// and writes it straight back.
    async fn run_echo_responder(listener: Box<dyn transport::Listener>) {
        loop {
            let socket = match listener.accept().await {
                Ok(s) => s,
                Err(_) => return,
            };
            common::async_std::task::spawn(async move {
                let codec = codec::JsonCodec::new();
                while let Ok(Some(request)) = socket.recv().await {
                    let body = match decode_body(&codec, &request.body) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    let mut headers = HashMap::new();
                    headers.insert("Content-Type".to_string(), codec.content_type().to_string());
                    let reply = Message {
                        headers,
                        body: encode_body(&codec, &body).unwrap().into(),
                    };
                    if socket.send(reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    }

    #[async_std::test]
    async fn call_round_trips_through_selector_and_pool() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let listener = transport.listen("svc://echo").await.unwrap();
        common::async_std::task::spawn(run_echo_responder(listener));

        let registry = Arc::new(MemoryRegistry::new());
        registry
            .register(
                "",
                Service {
                    name: "echo.service".to_string(),
                    version: "1.0.0".to_string(),
                    nodes: vec![Node {
                        id: "node-1".to_string(),
                        address: "svc://echo".to_string(),
                        metadata: HashMap::new(),
                    }],
                    ..Default::default()
                },
                RegisterOptions::default(),
            )
            .await
            .unwrap();

        let selector: Arc<dyn Selector> = Arc::new(DefaultSelector::new(registry, Policy::RoundRobin));
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let client = Client::new(transport, selector, broker);

        let request = Request::new("echo.service", "Echo.Say", json!({ "text": "hi" }));
        let response = client
            .call(&Context::background(), request, CallOptions::default())
            .await
            .unwrap();

        assert_eq!(response.body, json!({ "text": "hi" }));
    }

    #[async_std::test]
    async fn call_against_unknown_service_is_not_found() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(MemoryRegistry::new());
        let selector: Arc<dyn Selector> = Arc::new(DefaultSelector::new(registry, Policy::Random));
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let client = Client::new(transport, selector, broker);

        let request = Request::new("missing.service", "Go.Away", json!(null));
        let err = client
            .call(&Context::background(), request, CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Kind::NotFound);
    }
}
