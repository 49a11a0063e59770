use std::sync::Arc;

use broker::{Broker, HttpBroker, MemoryBroker};
use client::Client;
use codec::CodecRegistry;
use common::errors::Result;
use network::Network;
use registry::{MemoryRegistry, NetworkRegistry, Registry};
use router::{DefaultRouter, Router};
use selector::{DefaultSelector, Policy, Selector};
use server::Server;
use transport::{InMemoryTransport, TcpTransport, Transport};
use tunnel::Tunnel;

use crate::config::Config;

/// The composition root (§9 "No global singletons"): collects plugin
/// overrides via builder calls, then assembles `Client`/`Server`/
/// `Network` from a `Config` on demand. Nothing here runs until a
/// `build_*` method is called; no constructor has side effects.
pub struct Bootstrap {
    config: Config,
    codecs: Option<CodecRegistry>,
    transport: Option<Arc<dyn Transport>>,
    registry: Option<Arc<dyn Registry>>,
    broker: Option<Arc<dyn Broker>>,
    selector_policy: Policy,
}

impl Bootstrap {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            codecs: None,
            transport: None,
            registry: None,
            broker: None,
            selector_policy: Policy::default(),
        }
    }

    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Some(codecs);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn selector_policy(mut self, policy: Policy) -> Self {
        self.selector_policy = policy;
        self
    }

    fn resolve_transport(&self) -> Arc<dyn Transport> {
        if let Some(t) = &self.transport {
            return t.clone();
        }
        match &self.config.transport_address {
            Some(_) => Arc::new(TcpTransport::new()),
            None => Arc::new(InMemoryTransport::new()),
        }
    }

    fn resolve_registry(&self, transport: &Arc<dyn Transport>) -> Arc<dyn Registry> {
        if let Some(r) = &self.registry {
            return r.clone();
        }
        match &self.config.registry_address {
            Some(addr) => Arc::new(NetworkRegistry::new(transport.clone(), addr.clone())),
            None => Arc::new(MemoryRegistry::new()),
        }
    }

    fn resolve_broker(&self, transport: &Arc<dyn Transport>) -> Arc<dyn Broker> {
        if let Some(b) = &self.broker {
            return b.clone();
        }
        match &self.config.broker_address {
            Some(addr) => Arc::new(HttpBroker::new(transport.clone(), addr.clone())),
            None => Arc::new(MemoryBroker::new()),
        }
    }

    /// Builds a `Client` wired to this bootstrap's registry/broker/
    /// transport, load balanced per `selector_policy` (§4.4, §4.5).
    ///
    /// When `VINE_PROXY` is set, the selector bypasses the registry
    /// entirely (§4.4 "proxy hook"), which in turn collapses the
    /// client's retry loop to a single attempt (§4.5 "Retries are
    /// disabled automatically when a proxy address is in effect").
    pub fn build_client(&self) -> Client {
        let transport = self.resolve_transport();
        let registry = self.resolve_registry(&transport);
        let broker = self.resolve_broker(&transport);
        let selector: Arc<dyn Selector> = match &self.config.proxy {
            Some(addr) => Arc::new(DefaultSelector::with_proxy(
                registry,
                self.selector_policy,
                vec![addr.clone()],
            )),
            None => Arc::new(DefaultSelector::new(registry, self.selector_policy)),
        };
        Client::new(transport, selector, broker)
    }

    /// Builds a `Server` configured from `VINE_SERVER_ID`/`_NAME`/
    /// `_VERSION`/`_NAMESPACE` and the registration TTLs (§4.6). Codecs
    /// beyond the standard set can be layered on with `.codecs(...)`
    /// before calling this.
    pub fn build_server(&self) -> Server {
        let transport = self.resolve_transport();
        let registry = self.resolve_registry(&transport);
        let broker = self.resolve_broker(&transport);

        let server = Server::new(
            self.config.server_id.clone(),
            self.config.server_name.clone(),
            self.config.server_version.clone(),
            transport,
            registry,
            broker,
        )
        .with_domain(self.config.namespace.clone())
        .with_register_ttl(self.config.register_ttl)
        .with_register_interval(self.config.register_interval);

        match &self.codecs {
            Some(codecs) => server.with_codecs(codecs.clone()),
            None => server,
        }
    }

    /// Builds the overlay (§4.9): a started `Router`, a `Tunnel` bound to
    /// `VINE_TUNNEL_ADDRESS` and connected to `VINE_TUNNEL_SERVER` if
    /// set, and the `Network` bridging the two.
    pub async fn build_network(&self, router_id: impl Into<String>) -> Result<Network> {
        let transport = self.resolve_transport();
        let registry = self.resolve_registry(&transport);

        let router: Arc<dyn Router> = Arc::new(DefaultRouter::new(router_id.into(), self.config.namespace.clone(), registry));
        router.start().await?;

        let tunnel = Arc::new(Tunnel::new(
            self.config.server_id.clone(),
            self.config.tunnel_token.clone(),
            transport,
        ));

        if let Some(addr) = &self.config.tunnel_address {
            tunnel.listen(addr).await?;
        }
        if let Some(peer) = &self.config.tunnel_server {
            tunnel.connect(peer).await?;
        }

        Network::new(router, tunnel, self.config.namespace.clone()).await
    }
}
