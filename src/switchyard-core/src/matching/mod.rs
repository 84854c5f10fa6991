//! Condition evaluation and the selector / rule engines.

pub mod condition;
pub mod selector;
pub mod rule;

pub use condition::*;
pub use selector::*;
pub use rule::*;

use crate::context::RequestContext;
use crate::models::MatchMode;

/// Combines compiled conditions. An empty list never holds.
pub(crate) fn conditions_hold(mode: MatchMode, conditions: &[CompiledCondition], ctx: &RequestContext) -> bool {
    if conditions.is_empty() {
        return false;
    }
    match mode {
        MatchMode::And => conditions.iter().all(|c| c.evaluate(ctx)),
        MatchMode::Or => conditions.iter().any(|c| c.evaluate(ctx)),
    }
}
