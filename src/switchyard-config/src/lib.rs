use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use switchyard_core::{ConfigSnapshot, ContinuationPolicy};
use switchyard_health::HealthConfig;
use switchyard_reference::{ReferenceConfig, RegistryConfig};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCfg {
    #[serde(default = "def_name")]
    pub name: String,
    /// `plain`, `json` or `pretty`.
    #[serde(default = "def_logging")]
    pub logging_mode: String,
    /// `EnvFilter` directives, e.g. `info,switchyard_health=debug`.
    #[serde(default = "def_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub continuation: ContinuationPolicy,
}
fn def_name() -> String { "switchyard".into() }
fn def_logging() -> String { "plain".into() }
fn def_filter() -> String { "info".into() }

impl Default for GatewayCfg {
    fn default() -> Self {
        Self {
            name: def_name(),
            logging_mode: def_logging(),
            log_filter: def_filter(),
            continuation: ContinuationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneCfg {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub ws_url: String,
    #[serde(default = "def_poll")]
    pub poll_interval_sec: u64,
    #[serde(default = "def_cp_timeout")]
    pub timeout_ms: u64,
}
fn def_poll() -> u64 { 5 }
fn def_cp_timeout() -> u64 { 5000 }

impl Default for ControlPlaneCfg {
    fn default() -> Self {
        Self {
            url: String::new(),
            ws_url: String::new(),
            poll_interval_sec: def_poll(),
            timeout_ms: def_cp_timeout(),
        }
    }
}

impl ControlPlaneCfg {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// Where health status notifications go unless overridden.
    pub fn status_url(&self) -> String {
        format!("{}/upstream/status", self.url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    #[default]
    Tcp,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCfg {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "def_interval")]
    pub interval_ms: u64,
    #[serde(default = "def_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "def_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "def_concurrency")]
    pub max_concurrent_probes: usize,
    #[serde(default)]
    pub probe: ProbeKind,
    #[serde(default = "def_probe_path")]
    pub probe_path: String,
    #[serde(default)]
    pub notify_url: String,
}
fn def_interval() -> u64 { 10_000 }
fn def_probe_timeout() -> u64 { 3_000 }
fn def_threshold() -> u32 { 1 }
fn def_concurrency() -> usize { 16 }
fn def_probe_path() -> String { "/".into() }

impl Default for HealthCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: def_interval(),
            probe_timeout_ms: def_probe_timeout(),
            unhealthy_threshold: def_threshold(),
            max_concurrent_probes: def_concurrency(),
            probe: ProbeKind::default(),
            probe_path: def_probe_path(),
            notify_url: String::new(),
        }
    }
}

impl HealthCfg {
    pub fn to_health_config(&self) -> HealthConfig {
        HealthConfig {
            enabled: self.enabled,
            interval: Duration::from_millis(self.interval_ms.max(1)),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms.max(1)),
            unhealthy_threshold: self.unhealthy_threshold,
            max_concurrent_probes: self.max_concurrent_probes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceCfg {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default = "def_build_timeout")]
    pub build_timeout_ms: u64,
    #[serde(default = "def_max_refs")]
    pub max_references: u64,
}
fn def_build_timeout() -> u64 { 5_000 }
fn def_max_refs() -> u64 { 1_000 }

impl Default for ReferenceCfg {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            build_timeout_ms: def_build_timeout(),
            max_references: def_max_refs(),
        }
    }
}

impl ReferenceCfg {
    pub fn to_reference_config(&self) -> ReferenceConfig {
        ReferenceConfig {
            build_timeout: Duration::from_millis(self.build_timeout_ms),
            max_references: self.max_references,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TracingCfg {
    #[serde(default)]
    pub otlp_endpoint: String,
    #[serde(default)]
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BootstrapCfg {
    /// Local JSON / YAML / TOML snapshot used when no control plane is set.
    #[serde(default)]
    pub snapshot: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub gateway: GatewayCfg,
    #[serde(default)]
    pub controlplane: ControlPlaneCfg,
    #[serde(default)]
    pub health: HealthCfg,
    #[serde(default)]
    pub reference: ReferenceCfg,
    #[serde(default)]
    pub tracing: TracingCfg,
    #[serde(default)]
    pub bootstrap: BootstrapCfg,
}

fn parse_by_extension<T: DeserializeOwned>(path: &str, content: &str) -> Result<T> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "yaml" | "yml" => serde_yml::from_str(content).with_context(|| format!("parse yaml {path}")),
        "json" => serde_json::from_str(content).with_context(|| format!("parse json {path}")),
        "toml" => toml::from_str(content).with_context(|| format!("parse toml {path}")),
        _ => Err(anyhow!("Unknown config extension: {}", path)),
    }
}

pub fn load_config(path: &str) -> Result<FileConfig> {
    let content = fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    let cfg: FileConfig = parse_by_extension(path, &content)?;
    debug!(path, gateway = %cfg.gateway.name, "config loaded");
    Ok(cfg)
}

/// Reads a routing snapshot (`plugins`, `selectors`, `rules`, `metadata`).
pub fn load_snapshot(path: &str) -> Result<ConfigSnapshot> {
    let content = fs::read_to_string(path).with_context(|| format!("read snapshot {}", path))?;
    parse_by_extension(path, &content)
}
