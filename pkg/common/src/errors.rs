//! Structured error taxonomy shared by every layer of the mesh.
//!
//! Mirrors the teacher's `common::errors` module (a thin wrapper around the
//! `failure` crate) but adds the tagged `Kind` enum called for by the
//! framework's error design: library code should be able to ask "is this
//! retryable" without string matching.

use std::fmt;
use std::io;

pub use failure::Fail;

/// One of the error kinds enumerated in the framework's error handling
/// design. `Other` is the escape hatch used when wrapping a third-party
/// error (io, parsing, a dependency's own error type) at a component
/// boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    BadRequest,
    NotFound,
    Timeout,
    Unauthorized,
    Forbidden,
    InternalServerError,
    WatcherStopped,
    DuplicateRoute,
    RouteNotFound,
    Shutdown,
    Other,
}

impl Kind {
    /// Whether a client is permitted to retry a call that failed with this
    /// kind of error (§4.5/§7: NotFound and InternalServerError are
    /// retried, the rest are fatal).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Kind::NotFound | Kind::InternalServerError)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::BadRequest => "bad_request",
            Kind::NotFound => "not_found",
            Kind::Timeout => "timeout",
            Kind::Unauthorized => "unauthorized",
            Kind::Forbidden => "forbidden",
            Kind::InternalServerError => "internal_server_error",
            Kind::WatcherStopped => "watcher_stopped",
            Kind::DuplicateRoute => "duplicate_route",
            Kind::RouteNotFound => "route_not_found",
            Kind::Shutdown => "shutdown",
            Kind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// The crate-wide error type. Carries a `Kind` for programmatic dispatch
/// plus a human readable message / wrapped cause.
#[derive(Debug, Fail)]
#[fail(display = "{}: {}", kind, message)]
pub struct Error {
    kind: Kind,
    message: String,
    #[fail(cause)]
    cause: Option<failure::Error>,
}

impl Error {
    pub fn new(kind: Kind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn wrap(kind: Kind, cause: impl Into<failure::Error>) -> Self {
        let cause = cause.into();
        Self {
            message: cause.to_string(),
            kind,
            cause: Some(cause),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn downcast_ref<T: Fail>(&self) -> Option<&T> {
        self.cause.as_ref().and_then(|c| c.downcast_ref::<T>())
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Constructs an `Error` of kind `Other`, matching the teacher's free
/// `err_msg` helper.
pub fn err_msg(message: impl Into<String>) -> Error {
    Error::new(Kind::Other, message)
}

/// `format_err!("...", args)` -> `Error` of kind `Other`.
#[macro_export]
macro_rules! format_err {
    ($($arg:tt)*) => {
        $crate::errors::err_msg(format!($($arg)*))
    };
}

pub fn bad_request(message: impl Into<String>) -> Error {
    Error::new(Kind::BadRequest, message)
}

pub fn not_found(message: impl Into<String>) -> Error {
    Error::new(Kind::NotFound, message)
}

pub fn timeout(message: impl Into<String>) -> Error {
    Error::new(Kind::Timeout, message)
}

pub fn unauthorized(message: impl Into<String>) -> Error {
    Error::new(Kind::Unauthorized, message)
}

pub fn forbidden(message: impl Into<String>) -> Error {
    Error::new(Kind::Forbidden, message)
}

pub fn internal(message: impl Into<String>) -> Error {
    Error::new(Kind::InternalServerError, message)
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::TimedOut => Kind::Timeout,
            io::ErrorKind::NotFound => Kind::NotFound,
            _ => Kind::InternalServerError,
        };
        Error::wrap(kind, e)
    }
}

impl From<failure::Error> for Error {
    fn from(e: failure::Error) -> Self {
        Error::wrap(Kind::Other, e)
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(e: std::convert::Infallible) -> Self {
        match e {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_spec() {
        assert!(Kind::NotFound.is_retryable());
        assert!(Kind::InternalServerError.is_retryable());
        assert!(!Kind::BadRequest.is_retryable());
        assert!(!Kind::Unauthorized.is_retryable());
        assert!(!Kind::Forbidden.is_retryable());
    }

    #[test]
    fn wraps_io_errors_with_a_kind() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "nope");
        let err: Error = io_err.into();
        assert_eq!(err.kind(), Kind::NotFound);
    }
}
