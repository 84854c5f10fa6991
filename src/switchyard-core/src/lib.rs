pub mod models;
pub mod context;
pub mod matching;
pub mod events;
pub mod index;
pub mod status;

pub use models::*;
pub use context::RequestContext;
pub use matching::{
    evaluate, match_rule, match_selectors, CompiledCondition, CompiledRule, CompiledSelector,
    ContinuationPolicy, ParamType,
};
pub use events::{ChangeEvent, ConfigSnapshot, Entity, EntityType, Operation, RawChangeEvent};
pub use index::{RoutingSnapshot, RoutingTable, SideEffect};
pub use status::StatusNotification;

pub use switchyard_errors::{GatewayError, GatewayResult};
