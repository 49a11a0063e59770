//! The composition root (§9): reads `VINE_*` configuration and assembles
//! `Client`/`Server`/`Network` from it, so no crate in this workspace
//! reaches for a global singleton.

mod bootstrap;
mod config;

pub use bootstrap::Bootstrap;
pub use config::Config;
