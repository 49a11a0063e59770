//! Retry timing shared by the RPC client, registry watch reconnection, and
//! tunnel link probing.

pub mod backoff;
