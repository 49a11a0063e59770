use std::time::Duration;

use common::errors::Error;
use common::Context;
use serde_json::Value;

/// A unary or stream-opening request (§4.5). `endpoint` defaults to
/// `method` for unary calls; callers pass a distinct value only to
/// disambiguate endpoints that share a method name across versions (§3).
#[derive(Clone, Debug)]
pub struct Request {
    pub service: String,
    pub method: String,
    pub endpoint: String,
    pub content_type: String,
    pub body: Value,
}

impl Request {
    pub fn new(service: impl Into<String>, method: impl Into<String>, body: Value) -> Self {
        let method = method.into();
        Self {
            service: service.into(),
            endpoint: method.clone(),
            method,
            content_type: codec::JSON.to_string(),
            body,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct Response {
    pub body: Value,
}

/// `retry(ctx, request, attempt, err) -> (should_retry, fatal_err)` (§4.5
/// step 3f). The default predicate retries exactly when `err` is marked
/// retryable in the error taxonomy (`NotFound`/`InternalServerError`) and
/// the attempt budget isn't exhausted; `fatal_err` lets a predicate
/// substitute a different error than the one that triggered it (e.g.
/// translating a context-cancellation into a clearer message).
pub type RetryFn = dyn Fn(&Context, &Request, usize, &Error) -> (bool, Option<Error>) + Send + Sync;

pub fn default_retry(_ctx: &Context, _request: &Request, _attempt: usize, err: &Error) -> (bool, Option<Error>) {
    (err.is_retryable(), None)
}

/// Per-call overrides layered onto the client's configured defaults
/// (§4.5 step 1).
#[derive(Clone)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub retries: usize,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: 1,
        }
    }
}
