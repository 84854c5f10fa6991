// ---------- Handles: plugin-specific payloads attached to selectors and rules ----------
//
// Parsed once when config is applied. Unknown plugins, and payloads a known
// plugin cannot read, keep the original text in a `Raw` variant.

use serde::{Deserialize, Serialize};
use switchyard_errors::{GatewayError, GatewayResult};
use tracing::warn;

use super::Upstream;

/// HTTP load-balancing plugin; its selector handles carry upstream lists.
pub const DIVIDE_PLUGIN: &str = "divide";

fn def_timeout_ms() -> u64 {
    3000
}

/// Abstract load-balancing strategy named by handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoadBalance {
    #[serde(rename = "hash", alias = "consistentHash", alias = "consistenthash")]
    Hash,
    #[default]
    #[serde(rename = "random")]
    Random,
    #[serde(rename = "roundRobin", alias = "roundrobin", alias = "round_robin")]
    RoundRobin,
}

impl LoadBalance {
    pub fn name(&self) -> &'static str {
        match self {
            LoadBalance::Hash => "hash",
            LoadBalance::Random => "random",
            LoadBalance::RoundRobin => "roundRobin",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "hash" | "consistenthash" => Some(LoadBalance::Hash),
            "random" => Some(LoadBalance::Random),
            "roundrobin" | "round_robin" => Some(LoadBalance::RoundRobin),
            _ => None,
        }
    }
}

/// Rule handle of the divide plugin: `{"loadBalance":"random","retry":0,"timeout":3000}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DivideRuleHandle {
    #[serde(default)]
    pub load_balance: LoadBalance,
    #[serde(default)]
    pub retry: u32,
    #[serde(rename = "timeout", alias = "timeoutMs", default = "def_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DivideRuleHandle {
    fn default() -> Self {
        Self {
            load_balance: LoadBalance::Random,
            retry: 0,
            timeout_ms: def_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SelectorHandle {
    #[default]
    None,
    Upstreams(Vec<Upstream>),
    Raw { plugin: String, payload: String },
}

impl SelectorHandle {
    /// Strict parse; the error names the plugin and why the payload was rejected.
    pub fn try_parse(plugin: &str, payload: Option<&str>) -> GatewayResult<Self> {
        let Some(raw) = payload.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(SelectorHandle::None);
        };
        if plugin == DIVIDE_PLUGIN {
            serde_json::from_str::<Vec<Upstream>>(raw)
                .map(SelectorHandle::Upstreams)
                .map_err(|e| GatewayError::InvalidHandle {
                    plugin: plugin.to_string(),
                    reason: e.to_string(),
                })
        } else {
            Ok(SelectorHandle::Raw {
                plugin: plugin.to_string(),
                payload: raw.to_string(),
            })
        }
    }

    /// Lenient parse: a payload the plugin cannot read degrades to `Raw`.
    pub fn parse(plugin: &str, payload: Option<&str>) -> Self {
        Self::try_parse(plugin, payload).unwrap_or_else(|e| {
            warn!("keeping raw selector handle: {e}");
            SelectorHandle::Raw {
                plugin: plugin.to_string(),
                payload: payload.unwrap_or_default().to_string(),
            }
        })
    }

    pub fn upstreams(&self) -> Option<&[Upstream]> {
        match self {
            SelectorHandle::Upstreams(list) => Some(list),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, SelectorHandle::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RuleHandle {
    #[default]
    None,
    Divide(DivideRuleHandle),
    Raw { plugin: String, payload: String },
}

impl RuleHandle {
    pub fn try_parse(plugin: &str, payload: Option<&str>) -> GatewayResult<Self> {
        let Some(raw) = payload.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(RuleHandle::None);
        };
        if plugin == DIVIDE_PLUGIN {
            serde_json::from_str::<DivideRuleHandle>(raw)
                .map(RuleHandle::Divide)
                .map_err(|e| GatewayError::InvalidHandle {
                    plugin: plugin.to_string(),
                    reason: e.to_string(),
                })
        } else {
            Ok(RuleHandle::Raw {
                plugin: plugin.to_string(),
                payload: raw.to_string(),
            })
        }
    }

    pub fn parse(plugin: &str, payload: Option<&str>) -> Self {
        Self::try_parse(plugin, payload).unwrap_or_else(|e| {
            warn!("keeping raw rule handle: {e}");
            RuleHandle::Raw {
                plugin: plugin.to_string(),
                payload: payload.unwrap_or_default().to_string(),
            }
        })
    }

    pub fn load_balance(&self) -> Option<LoadBalance> {
        match self {
            RuleHandle::Divide(h) => Some(h.load_balance),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, RuleHandle::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divide_rule_handle_parses() {
        let handle = RuleHandle::parse(
            DIVIDE_PLUGIN,
            Some(r#"{"loadBalance":"random","retry":0,"timeout":3000}"#),
        );
        assert_eq!(
            handle,
            RuleHandle::Divide(DivideRuleHandle {
                load_balance: LoadBalance::Random,
                retry: 0,
                timeout_ms: 3000,
            })
        );
    }

    #[test]
    fn test_divide_rule_handle_defaults() {
        let RuleHandle::Divide(h) = RuleHandle::parse(DIVIDE_PLUGIN, Some(r#"{"loadBalance":"roundRobin"}"#)) else {
            panic!("expected divide handle");
        };
        assert_eq!(h.load_balance, LoadBalance::RoundRobin);
        assert_eq!(h.retry, 0);
        assert_eq!(h.timeout_ms, 3000);
    }

    #[test]
    fn test_unknown_plugin_keeps_raw_payload() {
        let handle = RuleHandle::parse("sign", Some(r#"{"secret":"x"}"#));
        assert_eq!(
            handle,
            RuleHandle::Raw {
                plugin: "sign".into(),
                payload: r#"{"secret":"x"}"#.into()
            }
        );
    }

    #[test]
    fn test_unreadable_divide_payload_degrades_to_raw() {
        assert!(RuleHandle::try_parse(DIVIDE_PLUGIN, Some("test-handle")).is_err());
        assert!(matches!(
            RuleHandle::parse(DIVIDE_PLUGIN, Some("test-handle")),
            RuleHandle::Raw { .. }
        ));
    }

    #[test]
    fn test_empty_payload_is_none() {
        assert!(SelectorHandle::parse(DIVIDE_PLUGIN, None).is_none());
        assert!(SelectorHandle::parse(DIVIDE_PLUGIN, Some("  ")).is_none());
        assert!(RuleHandle::parse(DIVIDE_PLUGIN, Some("")).is_none());
    }

    #[test]
    fn test_selector_upstream_list() {
        let handle = SelectorHandle::parse(
            DIVIDE_PLUGIN,
            Some(r#"[{"upstreamHost":"localhost","protocol":"http://","upstreamUrl":"127.0.0.1:8080","weight":60}]"#),
        );
        let list = handle.upstreams().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].weight, 60);
    }

    #[test]
    fn test_load_balance_names() {
        assert_eq!(LoadBalance::from_name("roundRobin"), Some(LoadBalance::RoundRobin));
        assert_eq!(LoadBalance::from_name("HASH"), Some(LoadBalance::Hash));
        assert_eq!(LoadBalance::from_name("leastActive"), None);
        assert_eq!(LoadBalance::RoundRobin.name(), "roundRobin");
    }
}
