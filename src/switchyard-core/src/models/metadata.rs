use serde::{Deserialize, Serialize};
use switchyard_errors::{GatewayError, GatewayResult};

use super::def_true;

/// How to invoke a backend for one request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetaData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub method_name: String,
    #[serde(default)]
    pub parameter_types: Option<String>,
    #[serde(default)]
    pub rpc_type: String,
    /// JSON-encoded [`RpcExt`].
    #[serde(default)]
    pub rpc_ext: Option<String>,
    #[serde(default = "def_true")]
    pub enabled: bool,
    #[serde(default)]
    pub date_updated: i64,
}

/// Protocol extension carried in `MetaData::rpc_ext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RpcExt {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, alias = "loadBalance")]
    pub loadbalance: Option<String>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub sent: Option<bool>,
}

impl MetaData {
    pub fn new(path: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            service_name: service_name.into(),
            enabled: true,
            ..Default::default()
        }
    }

    /// Parses the extension payload. A missing or blank payload is `None`.
    pub fn rpc_ext(&self) -> GatewayResult<Option<RpcExt>> {
        match self.rpc_ext.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| GatewayError::build(&self.path, format!("invalid rpcExt: {e}"))),
        }
    }
}
