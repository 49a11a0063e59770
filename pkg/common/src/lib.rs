//! Low-level utilities shared by every crate in the mesh: the error
//! taxonomy, task lifetimes, cancellation/context plumbing, and a futures
//! based condition variable. Modeled on `common` in the teacher repo, trimmed
//! to only what an RPC framework (as opposed to a whole systems monorepo)
//! needs.

pub extern crate async_std;
pub extern crate bytes;
pub extern crate futures;

pub use async_trait::async_trait;

pub mod cancellation;
pub mod condvar;
pub mod context;
pub mod errors;
pub mod task;

pub use cancellation::{CancellationHandle, CancellationToken};
pub use context::Context;
pub use errors::{Error, Result};
