use serde::{Deserialize, Serialize};

use super::def_true;

fn def_protocol() -> String {
    "http://".into()
}

fn def_weight() -> u32 {
    50
}

/// One backend endpoint of a pool.
///
/// `url` is the endpoint address (`host:port`) and doubles as the member's
/// identity inside a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    #[serde(rename = "upstreamHost", default)]
    pub host: String,
    #[serde(default = "def_protocol")]
    pub protocol: String,
    #[serde(rename = "upstreamUrl", default)]
    pub url: String,
    #[serde(default = "def_weight")]
    pub weight: u32,
    #[serde(default = "def_true")]
    pub status: bool,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub last_checked_at: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            host: String::new(),
            protocol: def_protocol(),
            url: String::new(),
            weight: def_weight(),
            status: true,
            timestamp: 0,
            last_checked_at: 0,
        }
    }
}

impl Upstream {
    pub fn new(url: impl Into<String>, weight: u32) -> Self {
        Self {
            url: url.into(),
            weight,
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn is_reachable(&self) -> bool {
        self.status
    }

    /// Protocol without the `://` suffix, lowercased. Empty means `http`.
    pub fn scheme(&self) -> String {
        let scheme = self
            .protocol
            .trim()
            .trim_end_matches("://")
            .trim_end_matches(':')
            .to_ascii_lowercase();
        if scheme.is_empty() { "http".into() } else { scheme }
    }

    /// `host:port` to connect to, with the port defaulted from the scheme.
    pub fn socket_address(&self) -> String {
        let base = if self.url.is_empty() { self.host.as_str() } else { self.url.as_str() };
        let authority = base
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(base);
        let authority = authority.split('/').next().unwrap_or(authority);
        if has_port(authority) {
            authority.to_string()
        } else {
            let port = match self.scheme().as_str() {
                "https" | "wss" | "grpcs" => 443,
                _ => 80,
            };
            format!("{authority}:{port}")
        }
    }

    /// Full probe target, e.g. `http://10.0.0.1:8080`.
    pub fn probe_target(&self) -> String {
        format!("{}://{}", self.scheme(), self.socket_address())
    }
}

fn has_port(authority: &str) -> bool {
    // bracketed IPv6 literal
    if let Some(end) = authority.rfind(']') {
        return authority[end..].contains(':');
    }
    authority
        .rsplit_once(':')
        .map(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}
