use std::sync::Arc;

use common::errors::*;
use router::Router;
use tunnel::Tunnel;

use crate::observer::RouterObserver;
use crate::proxy::Proxy;

/// Wraps a `Tunnel` plus a `Router` plus a `Proxy` (§4.9 "Network
/// composition"). Wiring the tunnel's route-update hook to the router
/// happens once, in `new`, via a `Weak` back-reference so neither crate
/// holds a strong cycle on the other.
pub struct Network {
    pub router: Arc<dyn Router>,
    pub tunnel: Arc<Tunnel>,
    pub proxy: Proxy,
    _observer: Arc<RouterObserver>,
}

impl Network {
    pub async fn new(router: Arc<dyn Router>, tunnel: Arc<Tunnel>, network_name: impl Into<String>) -> Result<Self> {
        let observer = Arc::new(RouterObserver::new(&router, network_name));
        tunnel.set_route_observer(Arc::downgrade(&observer)).await;

        let proxy = Proxy::new(router.clone(), tunnel.clone());

        Ok(Self {
            router,
            tunnel,
            proxy,
            _observer: observer,
        })
    }
}
