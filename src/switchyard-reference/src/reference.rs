use std::time::Duration;

use serde::{Deserialize, Serialize};

fn def_registry_timeout() -> u64 {
    3000
}

/// Shared registry parameters every reference is built against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "def_registry_timeout")]
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            protocol: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_ms: def_registry_timeout(),
        }
    }
}

/// Maps an abstract load-balance name to the runtime's identifier.
///
/// Total: unknown names come back lowercased.
pub fn runtime_load_balance(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "hash" | "consistenthash" => "consistenthash".into(),
        "roundrobin" | "round_robin" => "roundrobin".into(),
        _ => lower,
    }
}

/// Ready-to-invoke handle for one route path.
#[derive(Debug, Clone)]
pub struct RouteReference {
    pub path: String,
    pub service_name: String,
    pub method_name: String,
    pub version: Option<String>,
    pub group: Option<String>,
    /// Runtime load-balance identifier.
    pub load_balance: String,
    pub retries: u32,
    pub timeout: Duration,
    /// Base url calls are sent to.
    pub target: String,
    client: Option<reqwest::Client>,
}

impl RouteReference {
    pub(crate) fn new(
        path: impl Into<String>,
        service_name: impl Into<String>,
        target: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            path: path.into(),
            service_name: service_name.into(),
            method_name: String::new(),
            version: None,
            group: None,
            load_balance: "random".into(),
            retries: 0,
            timeout: Duration::from_millis(3000),
            target: target.into(),
            client: Some(client),
        }
    }

    /// What `get` answers for a path with nothing built.
    pub fn placeholder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            service_name: String::new(),
            method_name: String::new(),
            version: None,
            group: None,
            load_balance: String::new(),
            retries: 0,
            timeout: Duration::ZERO,
            target: String::new(),
            client: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.client.is_none()
    }

    /// Request against `target` joined with `suffix`; `None` for a placeholder.
    pub fn request(&self, method: reqwest::Method, suffix: &str) -> Option<reqwest::RequestBuilder> {
        let client = self.client.as_ref()?;
        let url = format!("{}{}", self.target.trim_end_matches('/'), suffix);
        Some(client.request(method, url).timeout(self.timeout))
    }
}
