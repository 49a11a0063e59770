//! RPC client runtime (§4.5): composes `codec` + `transport` + `selector`
//! + `registry` + `broker` to issue unary calls, open streams, and
//! publish to the broker, with client-side load balancing, a pooled
//! transport, and a quadratic-backoff retry loop.

mod client;
mod model;
mod pool;
mod stream;

pub use client::Client;
pub use model::{default_retry, CallOptions, Request, Response, RetryFn};
pub use pool::ConnectionPool;
pub use stream::Stream;
