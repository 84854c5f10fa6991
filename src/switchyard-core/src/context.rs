use std::collections::HashMap;
use std::net::IpAddr;

use http::header::{COOKIE, HOST};
use http::request::Parts;
use serde_json::Value;
use uuid::Uuid;

/// Request attributes the matchers read. Header names are stored lowercased.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    id: String,
    method: String,
    path: String,
    host: String,
    client_ip: Option<IpAddr>,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    cookies: HashMap<String, String>,
    body: Option<Value>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Builds a context from the head of an incoming request.
    pub fn from_parts(parts: &Parts, client_ip: Option<IpAddr>) -> Self {
        let mut ctx = Self::new(parts.method.as_str(), parts.uri.path());
        ctx.client_ip = client_ip;

        for (name, value) in parts.headers.iter() {
            if let Ok(v) = value.to_str() {
                ctx.headers
                    .entry(name.as_str().to_string())
                    .or_insert_with(|| v.to_string());
            }
        }

        ctx.host = parts
            .headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        if let Some(q) = parts.uri.query() {
            for (k, v) in form_urlencoded::parse(q.as_bytes()) {
                ctx.query.entry(k.into_owned()).or_insert_with(|| v.into_owned());
            }
        }

        for raw in parts.headers.get_all(COOKIE).iter() {
            if let Ok(raw) = raw.to_str() {
                ctx.cookies.extend(parse_cookies(raw));
            }
        }
        ctx
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into().to_ascii_lowercase();
        let value = value.into();
        if name == "host" {
            self.host = value.clone();
        }
        self.headers.insert(name, value);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Parses `bytes` as a JSON body; anything else leaves the body empty.
    pub fn with_body_bytes(mut self, bytes: &[u8]) -> Self {
        self.body = serde_json::from_slice(bytes).ok();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Host header as sent, port included.
    pub fn domain(&self) -> &str {
        &self.host
    }

    /// Host without the port.
    pub fn host(&self) -> &str {
        strip_port(&self.host)
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Top-level field of the JSON body, rendered as text.
    pub fn body_field(&self, name: &str) -> Option<String> {
        match self.body.as_ref()?.get(name)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

fn parse_cookies(raw: &str) -> impl Iterator<Item = (String, String)> + '_ {
    raw.split(';').filter_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        let k = k.trim();
        if k.is_empty() {
            return None;
        }
        Some((k.to_string(), v.trim().trim_matches('"').to_string()))
    })
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use serde_json::json;

    #[test]
    fn test_from_parts_reads_query_cookies_and_host() {
        let req = Request::builder()
            .method("post")
            .uri("/http/order/save?userId=7&tag=a%20b")
            .header("Host", "api.example.com:8080")
            .header("Cookie", "session=abc; theme=\"dark\"")
            .header("X-Env", "gray")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        let ctx = RequestContext::from_parts(&parts, "10.0.0.9".parse().ok());

        assert_eq!(ctx.method(), "POST");
        assert_eq!(ctx.path(), "/http/order/save");
        assert_eq!(ctx.domain(), "api.example.com:8080");
        assert_eq!(ctx.host(), "api.example.com");
        assert_eq!(ctx.query("userId"), Some("7"));
        assert_eq!(ctx.query("tag"), Some("a b"));
        assert_eq!(ctx.cookie("session"), Some("abc"));
        assert_eq!(ctx.cookie("theme"), Some("dark"));
        assert_eq!(ctx.header("x-env"), Some("gray"));
        assert_eq!(ctx.header("X-ENV"), Some("gray"));
        assert_eq!(ctx.client_ip().map(|ip| ip.to_string()).as_deref(), Some("10.0.0.9"));
        assert!(!ctx.id().is_empty());
    }

    #[test]
    fn test_body_field_renders_scalars() {
        let ctx = RequestContext::new("POST", "/")
            .with_body(json!({"name": "neo", "age": 30, "vip": true, "none": null}));
        assert_eq!(ctx.body_field("name").as_deref(), Some("neo"));
        assert_eq!(ctx.body_field("age").as_deref(), Some("30"));
        assert_eq!(ctx.body_field("vip").as_deref(), Some("true"));
        assert_eq!(ctx.body_field("none"), None);
        assert_eq!(ctx.body_field("missing"), None);
    }

    #[test]
    fn test_non_json_body_is_ignored() {
        let ctx = RequestContext::new("POST", "/").with_body_bytes(b"plain text");
        assert_eq!(ctx.body_field("anything"), None);
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:443"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
    }

    #[test]
    fn test_builder_host_header_sets_domain() {
        let ctx = RequestContext::new("get", "/").with_header("Host", "svc.local:9000");
        assert_eq!(ctx.domain(), "svc.local:9000");
        assert_eq!(ctx.host(), "svc.local");
        assert_eq!(ctx.method(), "GET");
    }

    #[test]
    fn test_host_header_overrides_earlier_host() {
        let ctx = RequestContext::new("GET", "/")
            .with_host("a.local")
            .with_header("Host", "b.local:81");
        assert_eq!(ctx.domain(), "b.local:81");
        assert_eq!(ctx.host(), "b.local");
        assert_eq!(ctx.header("host"), Some("b.local:81"));
    }
}
