use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::header::Header;

/// On-the-wire shape of a `Header`. Kept separate from `Header` itself so
/// that `Header::timeout` can stay a `Duration` in the API while the wire
/// representation (matching the `Timeout` header's nanosecond convention
/// from §6) stays a plain integer.
#[derive(Serialize, Deserialize)]
pub struct WireHeader {
    #[serde(rename = "Vine-Id")]
    pub id: String,
    #[serde(rename = "Vine-Service")]
    pub service: String,
    #[serde(rename = "Vine-Method")]
    pub method: String,
    #[serde(rename = "Vine-Endpoint")]
    pub endpoint: String,
    #[serde(rename = "Vine-Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "Vine-Stream", skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(rename = "Content-Type")]
    pub content_type: String,
    #[serde(rename = "Timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ns: Option<u64>,
    #[serde(flatten)]
    pub metadata: HashMap<String, String>,
}

impl From<&Header> for WireHeader {
    fn from(h: &Header) -> Self {
        Self {
            id: h.id.clone(),
            service: h.service.clone(),
            method: h.method.clone(),
            endpoint: h.endpoint.clone(),
            error: h.error.clone(),
            stream: h.stream.clone(),
            content_type: h.content_type.clone(),
            timeout_ns: h.timeout.map(|d| d.as_nanos() as u64),
            metadata: h.metadata.clone(),
        }
    }
}

impl From<WireHeader> for Header {
    fn from(w: WireHeader) -> Self {
        Self {
            id: w.id,
            service: w.service,
            method: w.method,
            endpoint: w.endpoint,
            error: w.error,
            stream: w.stream,
            content_type: w.content_type,
            timeout: w.timeout_ns.map(Duration::from_nanos),
            metadata: w.metadata,
        }
    }
}
