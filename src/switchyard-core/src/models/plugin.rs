use serde::{Deserialize, Serialize};

use super::def_true;

/// A gateway capability (protocol adapter, auth, logging...). Owns selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Plugin {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "def_true")]
    pub enabled: bool,
    #[serde(default)]
    pub date_updated: i64,
}

impl Plugin {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            date_updated: 0,
        }
    }
}
