use serde::{Deserialize, Serialize};

/// Which entity a condition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    #[default]
    Selector,
    Rule,
}

/// One predicate over a request attribute.
///
/// `param_type` and `operator` stay as the control plane sent them; the
/// evaluator decides what it understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", from = "ConditionWire")]
pub struct Condition {
    pub id: String,
    pub owner_type: OwnerType,
    pub owner_id: String,
    pub param_type: String,
    pub operator: String,
    pub param_name: String,
    pub param_value: String,
    pub date_updated: i64,
}

impl Condition {
    pub fn new(
        param_type: impl Into<String>,
        operator: impl Into<String>,
        param_name: impl Into<String>,
        param_value: impl Into<String>,
    ) -> Self {
        Self {
            param_type: param_type.into(),
            operator: operator.into(),
            param_name: param_name.into(),
            param_value: param_value.into(),
            ..Default::default()
        }
    }

    pub fn owned_by(mut self, owner_type: OwnerType, owner_id: impl Into<String>) -> Self {
        self.owner_type = owner_type;
        self.owner_id = owner_id.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

// Selector and rule condition payloads name their owner differently.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionWire {
    #[serde(default)]
    id: String,
    #[serde(default)]
    owner_type: Option<OwnerType>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    selector_id: Option<String>,
    #[serde(default)]
    rule_id: Option<String>,
    #[serde(default)]
    param_type: String,
    #[serde(default)]
    operator: String,
    #[serde(default)]
    param_name: String,
    #[serde(default)]
    param_value: String,
    #[serde(default)]
    date_updated: i64,
}

impl From<ConditionWire> for Condition {
    fn from(w: ConditionWire) -> Self {
        let (owner_type, owner_id) = match (w.owner_type, w.owner_id, w.rule_id, w.selector_id) {
            (Some(kind), Some(id), _, _) => (kind, id),
            (kind, None, Some(rule), _) => (kind.unwrap_or(OwnerType::Rule), rule),
            (kind, None, None, Some(selector)) => (kind.unwrap_or(OwnerType::Selector), selector),
            (kind, id, _, _) => (kind.unwrap_or_default(), id.unwrap_or_default()),
        };
        Self {
            id: w.id,
            owner_type,
            owner_id,
            param_type: w.param_type,
            operator: w.operator,
            param_name: w.param_name,
            param_value: w.param_value,
            date_updated: w.date_updated,
        }
    }
}
