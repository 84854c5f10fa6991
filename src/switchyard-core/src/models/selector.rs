use serde::{Deserialize, Serialize};

use super::{def_true, Condition};

/// How a list of conditions is combined.
///
/// Wire codes: `0` = `And`, `1` = `Or`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MatchMode {
    /// Every condition must hold.
    #[default]
    And,
    /// At least one condition must hold.
    Or,
}

impl TryFrom<u8> for MatchMode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(MatchMode::And),
            1 => Ok(MatchMode::Or),
            other => Err(format!("unknown match mode code {other}")),
        }
    }
}

impl From<MatchMode> for u8 {
    fn from(mode: MatchMode) -> Self {
        match mode {
            MatchMode::And => 0,
            MatchMode::Or => 1,
        }
    }
}

/// Wire codes: `0` = full traffic, `1` = conditional (custom flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SelectorType {
    FullFlow,
    #[default]
    CustomFlow,
}

impl TryFrom<u8> for SelectorType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SelectorType::FullFlow),
            1 => Ok(SelectorType::CustomFlow),
            other => Err(format!("unknown selector type code {other}")),
        }
    }
}

impl From<SelectorType> for u8 {
    fn from(kind: SelectorType) -> Self {
        match kind {
            SelectorType::FullFlow => 0,
            SelectorType::CustomFlow => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub id: String,
    #[serde(default)]
    pub plugin_id: String,
    /// Filled by the control plane on most payloads; resolved from the
    /// plugin index when missing.
    #[serde(default)]
    pub plugin_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub selector_type: SelectorType,
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub continued: bool,
    #[serde(default, alias = "loged")]
    pub logged: bool,
    #[serde(default)]
    pub sort: i32,
    #[serde(default = "def_true")]
    pub enabled: bool,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default, alias = "selectorConditions", alias = "conditionList")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub date_created: i64,
    #[serde(default)]
    pub date_updated: i64,
}

impl Selector {
    pub fn new(id: impl Into<String>, plugin_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            plugin_id: plugin_id.into(),
            name: name.into(),
            enabled: true,
            ..Default::default()
        }
    }
}
