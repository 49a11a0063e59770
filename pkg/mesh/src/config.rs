use std::env;
use std::time::Duration;

/// Everything the core reads from the environment (spec §6): registry,
/// broker, transport and server endpoints, the tunnel's identity and
/// pre-shared token, and the two auth keys that are only ever handed to
/// an external auth subsystem (token/JWT issuance is explicitly out of
/// scope for this crate; the core never reads them itself).
#[derive(Clone, Debug)]
pub struct Config {
    /// `VINE_REGISTRY_ADDRESS`. `None` selects the in-process
    /// `registry::MemoryRegistry` instead of `registry::NetworkRegistry`.
    pub registry_address: Option<String>,
    /// `VINE_BROKER_ADDRESS`. `None` selects `broker::MemoryBroker`.
    pub broker_address: Option<String>,
    /// `VINE_TRANSPORT_ADDRESS`. `None` selects the in-process
    /// `transport::InMemoryTransport`; otherwise a `transport::TcpTransport`
    /// bound to the given address.
    pub transport_address: Option<String>,
    /// `VINE_SERVER_ADDRESS`: where `Server::start` listens. Defaults to
    /// an ephemeral local address.
    pub server_address: String,
    /// `VINE_SERVER_ID`: this instance's node id. Defaults to a
    /// process-unique value derived from the clock if unset.
    pub server_id: String,
    /// `VINE_SERVER_NAME`.
    pub server_name: String,
    /// `VINE_SERVER_VERSION`.
    pub server_version: String,
    /// `VINE_NAMESPACE`: the registry/router domain this instance
    /// operates in (§4.3 "Namespacing is lexical").
    pub namespace: String,
    /// `VINE_PROXY`: address of a sidecar the client should route every
    /// call through instead of resolving via the selector directly.
    pub proxy: Option<String>,
    /// `VINE_TUNNEL_ADDRESS`: local address the tunnel listens on.
    pub tunnel_address: Option<String>,
    /// `VINE_TUNNEL_TOKEN`: this tunnel's pre-shared authentication key.
    pub tunnel_token: String,
    /// `VINE_TUNNEL_SERVER`: an upstream tunnel peer to connect to on
    /// startup.
    pub tunnel_server: Option<String>,
    /// `VINE_AUTH_PUBLIC_KEY` / `VINE_AUTH_PRIVATE_KEY`: opaque to the
    /// core, passed through for an external auth subsystem to consume.
    pub auth_public_key: Option<String>,
    pub auth_private_key: Option<String>,
    /// `registerTTL` (§4.6), not independently configurable by an
    /// environment variable in the spec but kept here so `Bootstrap`
    /// doesn't hardcode it.
    pub register_ttl: Duration,
    pub register_interval: Duration,
}

impl Config {
    /// Reads every `VINE_*` variable, applying the defaults spec §6
    /// leaves implicit.
    pub fn from_env() -> Self {
        Self {
            registry_address: non_empty_env("VINE_REGISTRY_ADDRESS"),
            broker_address: non_empty_env("VINE_BROKER_ADDRESS"),
            transport_address: non_empty_env("VINE_TRANSPORT_ADDRESS"),
            server_address: env::var("VINE_SERVER_ADDRESS").unwrap_or_else(|_| "127.0.0.1:0".to_string()),
            server_id: env::var("VINE_SERVER_ID").unwrap_or_else(|_| default_server_id()),
            server_name: env::var("VINE_SERVER_NAME").unwrap_or_else(|_| "mesh.service".to_string()),
            server_version: env::var("VINE_SERVER_VERSION").unwrap_or_else(|_| "latest".to_string()),
            namespace: env::var("VINE_NAMESPACE").unwrap_or_default(),
            proxy: non_empty_env("VINE_PROXY"),
            tunnel_address: non_empty_env("VINE_TUNNEL_ADDRESS"),
            tunnel_token: env::var("VINE_TUNNEL_TOKEN").unwrap_or_default(),
            tunnel_server: non_empty_env("VINE_TUNNEL_SERVER"),
            auth_public_key: non_empty_env("VINE_AUTH_PUBLIC_KEY"),
            auth_private_key: non_empty_env("VINE_AUTH_PRIVATE_KEY"),
            register_ttl: Duration::from_secs(90),
            register_interval: Duration::from_secs(30),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_address: None,
            broker_address: None,
            transport_address: None,
            server_address: "127.0.0.1:0".to_string(),
            server_id: default_server_id(),
            server_name: "mesh.service".to_string(),
            server_version: "latest".to_string(),
            namespace: String::new(),
            proxy: None,
            tunnel_address: None,
            tunnel_token: String::new(),
            tunnel_server: None,
            auth_public_key: None,
            auth_private_key: None,
            register_ttl: Duration::from_secs(90),
            register_interval: Duration::from_secs(30),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn default_server_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("mesh-{:x}", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_any_env_vars() {
        let config = Config::default();
        assert_eq!(config.server_address, "127.0.0.1:0");
        assert!(config.registry_address.is_none());
        assert!(!config.server_id.is_empty());
    }
}
