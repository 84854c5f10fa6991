use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{conditions_hold, CompiledCondition};
use crate::context::RequestContext;
use crate::models::{Selector, SelectorHandle, SelectorType};

/// What the router does with the selectors that follow a `continued` match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPolicy {
    /// Route on the first matched selector; the rest of the chain is reported
    /// alongside the decision.
    #[default]
    FirstMatch,
    /// Walk the chain until a selector yields a rule or a handle.
    Accumulate,
}

/// A selector with its handle parsed and conditions compiled.
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    pub selector: Arc<Selector>,
    pub plugin_name: String,
    pub handle: SelectorHandle,
    conditions: Vec<CompiledCondition>,
}

impl CompiledSelector {
    pub fn compile(selector: Selector, plugin_name: &str) -> Self {
        let handle = SelectorHandle::parse(plugin_name, selector.handle.as_deref());
        let conditions = selector.conditions.iter().map(CompiledCondition::compile).collect();
        Self {
            selector: Arc::new(selector),
            plugin_name: plugin_name.to_string(),
            handle,
            conditions,
        }
    }

    pub fn id(&self) -> &str {
        &self.selector.id
    }

    pub fn name(&self) -> &str {
        &self.selector.name
    }

    /// Full-traffic selectors match without looking at conditions. Disabled
    /// selectors never match.
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        if !self.selector.enabled {
            return false;
        }
        match self.selector.selector_type {
            SelectorType::FullFlow => true,
            SelectorType::CustomFlow => conditions_hold(self.selector.match_mode, &self.conditions, ctx),
        }
    }

    fn rank(&self) -> (i32, &str) {
        (self.selector.sort, self.selector.id.as_str())
    }
}

/// Orders selectors by sort value, then id.
pub fn sort_selectors(list: &mut [Arc<CompiledSelector>]) {
    list.sort_by(|a, b| a.rank().cmp(&b.rank()));
}

/// Matched selectors in evaluation order.
///
/// A match with `continued == false` ends the walk; `continued == true` lets
/// later selectors be tried too.
pub fn match_selectors<'a>(selectors: &'a [Arc<CompiledSelector>], ctx: &RequestContext) -> Vec<&'a Arc<CompiledSelector>> {
    let mut ordered: Vec<&Arc<CompiledSelector>> = selectors.iter().collect();
    if !selectors.is_sorted_by(|a, b| a.rank() <= b.rank()) {
        ordered.sort_by(|a, b| a.rank().cmp(&b.rank()));
    }

    let mut matched = Vec::new();
    for s in ordered {
        if !s.matches(ctx) {
            continue;
        }
        debug!(selector = %s.id(), name = %s.name(), path = %ctx.path(), "selector matched");
        matched.push(s);
        if !s.selector.continued {
            break;
        }
    }
    matched
}
