use serde::{Deserialize, Serialize};

use super::{def_true, Condition, MatchMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub selector_id: String,
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub name: String,
    #[serde(default = "def_true")]
    pub enabled: bool,
    #[serde(default, alias = "loged")]
    pub logged: bool,
    #[serde(default)]
    pub sort: i32,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default, alias = "ruleConditions", alias = "conditionDataList")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub date_created: i64,
    #[serde(default)]
    pub date_updated: i64,
}

impl Rule {
    pub fn new(id: impl Into<String>, selector_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            selector_id: selector_id.into(),
            name: name.into(),
            enabled: true,
            ..Default::default()
        }
    }
}
