//! Integration tests exercising `client` and `server` together over the
//! in-memory transport. E3/E4/E5 have their own unit-test suites in
//! `registry`/`router`/`tunnel` respectively; these cover the properties
//! that genuinely need both ends of the wire at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use broker::MemoryBroker;
use client::{CallOptions, Client, Request};
use common::errors::Kind;
use common::Context;
use registry::{Action, MemoryRegistry, Registry};
use selector::{DefaultSelector, Policy};
use serde_json::json;
use server::Server;
use transport::{InMemoryTransport, Transport};

fn build_server(transport: Arc<dyn Transport>, registry: Arc<dyn Registry>, id: &str) -> Server {
    let broker = Arc::new(MemoryBroker::new());
    Server::new(id, "greeter.service", "1.0.0", transport, registry, broker)
}

fn build_client(transport: Arc<dyn Transport>, registry: Arc<dyn Registry>) -> Client {
    let selector: Arc<dyn selector::Selector> = Arc::new(DefaultSelector::new(registry, Policy::RoundRobin));
    let broker = Arc::new(MemoryBroker::new());
    Client::new(transport, selector, broker)
}

/// §8 E1: a watcher started before registration sees the create event,
/// and a client call against the freshly registered service round-trips.
#[async_std::test]
async fn basic_rpc_round_trip_and_registry_watch() {
    let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
    let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());

    let watch = registry.watch("", Some("greeter.service")).await.unwrap();

    let server = build_server(transport.clone(), registry.clone(), "node-1");
    server
        .handle("greeter.service", "Say.Hello", json!({}), json!({}), |_ctx: Context, body: serde_json::Value| async move {
            let name = body["name"].as_str().unwrap_or("").to_string();
            Ok(json!({ "msg": format!("Hello {}", name) }))
        })
        .await;
    server.start("svc://greeter-1").await.unwrap();

    let event = watch.recv().await.unwrap();
    assert_eq!(event.action, Action::Create);
    assert_eq!(event.service.name, "greeter.service");

    let client = build_client(transport, registry);
    let request = Request::new("greeter.service", "Say.Hello", json!({ "name": "world" }));
    let response = client
        .call(&Context::background(), request, CallOptions::default())
        .await
        .unwrap();
    assert_eq!(response.body, json!({ "msg": "Hello world" }));

    server.stop().await.unwrap();
}

/// §8 E2: two nodes registered, one killed; the remaining 10 calls all
/// succeed once the selector stops choosing the dead node.
#[async_std::test]
async fn load_balance_and_failover_excludes_the_dead_node() {
    let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
    let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());

    let server_a = build_server(transport.clone(), registry.clone(), "node-a");
    server_a
        .handle("counter.service", "Count.Next", json!({}), json!({}), |_ctx: Context, _body: serde_json::Value| async move {
            Ok(json!({ "ok": true }))
        })
        .await;
    server_a.start("svc://counter-a").await.unwrap();

    let server_b = build_server(transport.clone(), registry.clone(), "node-b");
    server_b
        .handle("counter.service", "Count.Next", json!({}), json!({}), |_ctx: Context, _body: serde_json::Value| async move {
            Ok(json!({ "ok": true }))
        })
        .await;
    server_b.start("svc://counter-b").await.unwrap();

    // node A goes away: `stop` deregisters it and tears down its accept
    // loop, so dialing it now fails outright.
    server_a.stop().await.unwrap();

    let client = build_client(transport, registry);
    for _ in 0..10 {
        let request = Request::new("counter.service", "Count.Next", json!(null));
        let response = client
            .call(&Context::background(), request, CallOptions { retries: 2, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(response.body, json!({ "ok": true }));
    }

    server_b.stop().await.unwrap();
}

/// §8 E6: a handler that sleeps far longer than the client's timeout
/// surfaces `Kind::Timeout` to the caller quickly, and the server-side
/// deadline context is what actually cancels the handler.
#[async_std::test]
async fn cancellation_propagates_the_deadline_to_the_handler() {
    let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
    let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());

    let server = build_server(transport.clone(), registry.clone(), "node-slow");
    let handler_cancelled = Arc::new(async_std::sync::Mutex::new(false));
    let flag = handler_cancelled.clone();
    server
        .handle("slow.service", "Go.Slow", json!({}), json!({}), move |ctx: Context, _body: serde_json::Value| {
            let flag = flag.clone();
            async move {
                // Independent of whatever the outer dispatch loop does
                // with this call's own future, this watches the same
                // context for the deadline firing.
                let token = ctx.cancellation();
                async_std::task::spawn(async move {
                    token.wait().await;
                    *flag.lock().await = true;
                });
                async_std::task::sleep(Duration::from_secs(5)).await;
                Ok(json!({ "done": true }))
            }
        })
        .await;
    server.start("svc://slow-1").await.unwrap();

    let client = build_client(transport, registry);
    let request = Request::new("slow.service", "Go.Slow", json!(null));
    let started = Instant::now();
    let err = client
        .call(
            &Context::background(),
            request,
            CallOptions {
                timeout: Some(Duration::from_millis(100)),
                retries: 1,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Kind::Timeout);
    assert!(started.elapsed() < Duration::from_millis(500));

    async_std::task::sleep(Duration::from_millis(200)).await;
    assert!(*handler_cancelled.lock().await, "server-side context should have been cancelled by the deadline");

    server.stop().await.unwrap();
}
