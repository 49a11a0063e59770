use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One method a `Service` exposes. Request/response schemas are left as
/// opaque JSON values here (introspection/bot tooling live outside the
/// core and consume whatever a `server` crate populates this with); what
/// the registry needs is just the name and routing metadata (§3).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    #[serde(default)]
    pub request: serde_json::Value,
    #[serde(default)]
    pub response: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A single running instance of a `Service` (§3). `metadata["protocol"]`
/// tells the client which content-type dialect to speak without falling
/// back to the backward-compatibility rewrite in `codec`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Node {
    pub fn protocol(&self) -> Option<&str> {
        self.metadata.get("protocol").map(String::as_str)
    }
}

/// Logical name + version, an ordered list of endpoints, and the nodes
/// currently serving it. The identity key for merging is `(name, version)`
/// (§3): two `Service` values with the same key merge by unioning nodes
/// and endpoints rather than overwriting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Service {
    pub fn key(&self) -> (String, String) {
        (self.name.clone(), self.version.clone())
    }

    /// Unions `other` into `self` in place: nodes are deduped by id,
    /// endpoints by name.
    pub fn merge(&mut self, other: Service) {
        for node in other.nodes {
            if !self.nodes.iter().any(|n| n.id == node.id) {
                self.nodes.push(node);
            }
        }
        for endpoint in other.endpoints {
            if !self.endpoints.iter().any(|e| e.name == endpoint.name) {
                self.endpoints.push(endpoint);
            }
        }
    }
}

/// Per-registration knobs (§3 "Registration record").
#[derive(Clone, Debug)]
pub struct RegisterOptions {
    pub ttl: Duration,
    /// Tenant namespace. Empty string is the default (unprefixed) domain.
    pub domain: String,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(90),
            domain: String::new(),
        }
    }
}

/// What happened to a `Service` in a `Watch` stream (§4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchEvent {
    pub action: Action,
    pub service: Service,
}

/// `ns/<name>` when `domain` is non-empty, else the bare name (§4.3
/// "Namespacing is lexical").
pub fn namespaced_key(domain: &str, name: &str) -> String {
    if domain.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", domain, name)
    }
}
