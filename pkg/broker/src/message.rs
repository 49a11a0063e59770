use std::collections::HashMap;

use bytes::Bytes;

/// A pub/sub payload (§4.10). Distinct from `transport::Message`: a broker
/// message always has a topic and is never framed with `Vine-*` RPC
/// headers, though `metadata` can carry the same kind of user-supplied
/// key/value pairs.
#[derive(Clone, Debug, Default)]
pub struct Message {
    pub topic: String,
    pub metadata: HashMap<String, String>,
    pub body: Bytes,
}
