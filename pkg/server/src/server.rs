use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use broker::Broker;
use codec::CodecRegistry;
use common::async_std::sync::Mutex;
use common::errors::*;
use common::task::ChildTask;
use registry::{Node, RegisterOptions, Registry, Service};
use serde_json::Value;
use transport::Transport;

use crate::dispatch::{serve_socket, Handlers};
use crate::model::{EndpointEntry, Handler, HandlerKind, StreamHandler};
use crate::registration::InFlight;

/// `registerTTL` default (§4.6 "Registration loop").
const DEFAULT_REGISTER_TTL: Duration = Duration::from_secs(90);
/// `registerInterval` default.
const DEFAULT_REGISTER_INTERVAL: Duration = Duration::from_secs(30);

/// Accepts sockets, dispatches to registered handlers, and keeps this
/// instance's registration alive with the `Registry` (§4.6).
///
/// Built from a `Config`/`Bootstrap`, never via a global singleton: every
/// dependency (`Transport`, `Registry`, `Broker`) is passed in explicitly.
pub struct Server {
    id: String,
    name: String,
    version: String,
    domain: String,
    transport: Arc<dyn Transport>,
    registry: Arc<dyn Registry>,
    broker: Arc<dyn Broker>,
    codecs: CodecRegistry,
    handlers: Arc<Handlers>,
    register_ttl: Duration,
    register_interval: Duration,
    in_flight: Arc<InFlight>,
    address: Mutex<Option<String>>,
    tasks: Mutex<Vec<ChildTask>>,
}

impl Server {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn Registry>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            domain: String::new(),
            transport,
            registry,
            broker,
            codecs: CodecRegistry::standard(),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            register_ttl: DEFAULT_REGISTER_TTL,
            register_interval: DEFAULT_REGISTER_INTERVAL,
            in_flight: Arc::new(InFlight::new()),
            address: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_register_ttl(mut self, ttl: Duration) -> Self {
        self.register_ttl = ttl;
        self
    }

    pub fn with_register_interval(mut self, interval: Duration) -> Self {
        self.register_interval = interval;
        self
    }

    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Access to the broker, for handlers that need to publish as a side
    /// effect of serving a request.
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub async fn handle(&self, service: &str, method: &str, input_schema: Value, output_schema: Value, handler: impl Handler + 'static) {
        self.register_entry(service, method, input_schema, output_schema, false, HandlerKind::Unary(Arc::new(handler)))
            .await;
    }

    /// Registers a handler without advertising its endpoint in the
    /// registry (§4.6 "An internal handler is dispatched normally but not
    /// advertised").
    pub async fn handle_internal(&self, service: &str, method: &str, input_schema: Value, output_schema: Value, handler: impl Handler + 'static) {
        self.register_entry(service, method, input_schema, output_schema, true, HandlerKind::Unary(Arc::new(handler)))
            .await;
    }

    pub async fn handle_stream(
        &self,
        service: &str,
        method: &str,
        input_schema: Value,
        output_schema: Value,
        handler: impl StreamHandler + 'static,
    ) {
        self.register_entry(service, method, input_schema, output_schema, false, HandlerKind::Stream(Arc::new(handler)))
            .await;
    }

    async fn register_entry(&self, service: &str, method: &str, input_schema: Value, output_schema: Value, internal: bool, kind: HandlerKind) {
        let endpoint = registry::Endpoint {
            name: method.to_string(),
            request: input_schema,
            response: output_schema,
            metadata: HashMap::new(),
        };
        let entry = Arc::new(EndpointEntry { kind, endpoint, internal });
        self.handlers.lock().await.insert((service.to_string(), method.to_string()), entry);
    }

    async fn build_service(&self, address: &str) -> Service {
        let handlers = self.handlers.lock().await;
        let endpoints = handlers.values().filter(|e| !e.internal).map(|e| e.endpoint.clone()).collect();
        Service {
            name: self.name.clone(),
            version: self.version.clone(),
            metadata: HashMap::new(),
            endpoints,
            nodes: vec![Node {
                id: self.id.clone(),
                address: address.to_string(),
                metadata: HashMap::new(),
            }],
        }
    }

    /// Starts accepting sockets on `addr` and registers with the
    /// registry, refreshing every `registerInterval` (§4.6).
    pub async fn start(&self, addr: &str) -> Result<()> {
        let listener = self.transport.listen(addr).await?;
        let address = listener.local_address();
        *self.address.lock().await = Some(address.clone());

        let service = self.build_service(&address).await;
        self.registry
            .register(
                &self.domain,
                service.clone(),
                RegisterOptions {
                    ttl: self.register_ttl,
                    domain: self.domain.clone(),
                },
            )
            .await?;

        let handlers = self.handlers.clone();
        let codecs = self.codecs.clone();
        let in_flight = self.in_flight.clone();
        let accept_task = ChildTask::spawn(async move {
            loop {
                let socket = match listener.accept().await {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let handlers = handlers.clone();
                let codecs = codecs.clone();
                let in_flight = in_flight.clone();
                common::async_std::task::spawn(async move {
                    serve_socket(socket, handlers, codecs, in_flight).await;
                });
            }
        });

        let registry = self.registry.clone();
        let domain = self.domain.clone();
        let interval = self.register_interval;
        let ttl = self.register_ttl;
        let register_task = ChildTask::spawn(async move {
            loop {
                common::async_std::task::sleep(interval).await;
                let _ = registry
                    .register(
                        &domain,
                        service.clone(),
                        RegisterOptions {
                            ttl,
                            domain: domain.clone(),
                        },
                    )
                    .await;
            }
        });

        let mut tasks = self.tasks.lock().await;
        tasks.push(accept_task);
        tasks.push(register_task);
        Ok(())
    }

    /// Graceful shutdown, in the order §4.6 specifies: deregister, drain
    /// in-flight requests, close listeners.
    pub async fn stop(&self) -> Result<()> {
        let address = self.address.lock().await.clone().unwrap_or_default();
        let service = self.build_service(&address).await;
        let _ = self.registry.deregister(&self.domain, service).await;

        self.in_flight.drain().await;

        self.tasks.lock().await.clear();
        Ok(())
    }
}
