//! Socket-level transport between mesh nodes (§4.2).
//!
//! Sits below `codec`: a `Socket` moves `Message { headers, body }` frames,
//! it has no idea what's inside the body. `client`/`server` are the layers
//! that glue a `Transport` and a `Codec` together into an RPC call.

mod in_memory;
mod socket;
mod tcp;

pub use in_memory::InMemoryTransport;
pub use socket::{DialOptions, Listener, Message, Socket, Transport};
pub use tcp::TcpTransport;
