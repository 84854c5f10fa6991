use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::Upstream;

/// Published whenever health checking changes a pool's membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotification {
    pub selector_key: String,
    pub upstream_list: Vec<Upstream>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl StatusNotification {
    pub fn new(selector_key: impl Into<String>, upstream_list: Vec<Upstream>) -> Self {
        Self {
            selector_key: selector_key.into(),
            upstream_list,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}
