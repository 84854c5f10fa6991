//! Change events pushed by the control plane, and bulk snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_errors::{GatewayError, GatewayResult};

use crate::models::{Condition, MetaData, Plugin, Rule, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    #[serde(alias = "PLUGIN")]
    Plugin,
    #[serde(alias = "SELECTOR")]
    Selector,
    #[serde(alias = "RULE")]
    Rule,
    #[serde(alias = "CONDITION")]
    Condition,
    #[serde(alias = "META_DATA", alias = "metadata", alias = "metaData")]
    MetaData,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Plugin => "plugin",
            EntityType::Selector => "selector",
            EntityType::Rule => "rule",
            EntityType::Condition => "condition",
            EntityType::MetaData => "metaData",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    #[serde(alias = "CREATE")]
    Create,
    #[serde(alias = "UPDATE", alias = "REFRESH", alias = "refresh")]
    Update,
    #[serde(alias = "DELETE")]
    Delete,
}

/// Whole-entity payload of a change event.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Plugin(Plugin),
    Selector(Selector),
    Rule(Rule),
    Condition(Condition),
    MetaData(MetaData),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Plugin(_) => EntityType::Plugin,
            Entity::Selector(_) => EntityType::Selector,
            Entity::Rule(_) => EntityType::Rule,
            Entity::Condition(_) => EntityType::Condition,
            Entity::MetaData(_) => EntityType::MetaData,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Plugin(p) => &p.id,
            Entity::Selector(s) => &s.id,
            Entity::Rule(r) => &r.id,
            Entity::Condition(c) => &c.id,
            Entity::MetaData(m) if m.id.is_empty() => &m.path,
            Entity::MetaData(m) => &m.id,
        }
    }

    /// `dateUpdated` of the payload; `0` means unversioned.
    pub fn version(&self) -> i64 {
        match self {
            Entity::Plugin(p) => p.date_updated,
            Entity::Selector(s) => s.date_updated,
            Entity::Rule(r) => r.date_updated,
            Entity::Condition(c) => c.date_updated,
            Entity::MetaData(m) => m.date_updated,
        }
    }
}

/// `{entityType, operation, payload}` as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChangeEvent {
    pub entity_type: EntityType,
    pub operation: Operation,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation: Operation,
    pub entity: Entity,
}

impl ChangeEvent {
    pub fn upsert(entity: Entity) -> Self {
        Self {
            operation: Operation::Update,
            entity,
        }
    }

    pub fn delete(entity: Entity) -> Self {
        Self {
            operation: Operation::Delete,
            entity,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete
    }

    /// Decodes one websocket text frame: a single event or an array of them.
    pub fn parse_frame(text: &str) -> GatewayResult<Vec<ChangeEvent>> {
        let value: Value = serde_json::from_str(text).map_err(|e| GatewayError::InvalidEvent(e.to_string()))?;
        let raws: Vec<RawChangeEvent> = match value {
            Value::Array(_) => serde_json::from_value(value),
            other => serde_json::from_value(other).map(|one| vec![one]),
        }
        .map_err(|e| GatewayError::InvalidEvent(e.to_string()))?;
        raws.into_iter().map(ChangeEvent::try_from).collect()
    }
}

impl TryFrom<RawChangeEvent> for ChangeEvent {
    type Error = GatewayError;

    fn try_from(raw: RawChangeEvent) -> Result<Self, Self::Error> {
        fn decode<T: serde::de::DeserializeOwned>(kind: EntityType, payload: Value) -> GatewayResult<T> {
            serde_json::from_value(payload)
                .map_err(|e| GatewayError::InvalidEvent(format!("{} payload: {e}", kind.as_str())))
        }

        let entity = match raw.entity_type {
            EntityType::Plugin => Entity::Plugin(decode(raw.entity_type, raw.payload)?),
            EntityType::Selector => Entity::Selector(decode(raw.entity_type, raw.payload)?),
            EntityType::Rule => Entity::Rule(decode(raw.entity_type, raw.payload)?),
            EntityType::Condition => Entity::Condition(decode(raw.entity_type, raw.payload)?),
            EntityType::MetaData => Entity::MetaData(decode(raw.entity_type, raw.payload)?),
        };
        Ok(Self {
            operation: raw.operation,
            entity,
        })
    }
}

/// Complete configuration, as pulled in bulk or read from a local file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub plugins: Vec<Plugin>,
    #[serde(default)]
    pub selectors: Vec<Selector>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, alias = "metaData")]
    pub metadata: Vec<MetaData>,
}
