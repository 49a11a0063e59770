use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use common::errors::Result;
use common::Context;
use serde_json::Value;

use crate::stream::ServerStream;

/// One registered unary method (§4.6). Schemas are opaque JSON values the
/// caller supplies at registration time (endpoint discovery is
/// schema-driven, not reflected off the handler's Rust type).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &Context, body: Value) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Context, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, ctx: &Context, body: Value) -> Result<Value> {
        (self)(ctx.clone(), body).await
    }
}

/// One registered streaming method (§4.6, §4.5 "Streaming"): `first` is
/// the decoded body of the request that opened the stream, `stream` lets
/// the handler keep exchanging values for the socket's lifetime.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn call(&self, ctx: &Context, first: Value, stream: ServerStream) -> Result<()>;
}

#[async_trait]
impl<F, Fut> StreamHandler for F
where
    F: Fn(Context, Value, ServerStream) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn call(&self, ctx: &Context, first: Value, stream: ServerStream) -> Result<()> {
        (self)(ctx.clone(), first, stream).await
    }
}

pub(crate) enum HandlerKind {
    Unary(Arc<dyn Handler>),
    Stream(Arc<dyn StreamHandler>),
}

/// A registered `(service, method)` pair: the handler plus the
/// `registry::Endpoint` metadata advertised alongside the service,
/// unless `internal` is set (§4.6 "An internal handler is dispatched
/// normally but not advertised in the registry").
pub(crate) struct EndpointEntry {
    pub kind: HandlerKind,
    pub endpoint: registry::Endpoint,
    pub internal: bool,
}
