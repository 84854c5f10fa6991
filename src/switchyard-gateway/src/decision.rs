use std::sync::Arc;

use switchyard_core::{LoadBalance, Rule, RuleHandle, Selector, SelectorHandle, Upstream};

/// Directive the request is handled with: the matched rule's handle, or the
/// selector's when no rule matched.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionHandle {
    Rule(RuleHandle),
    Selector(SelectorHandle),
}

impl DecisionHandle {
    pub fn load_balance(&self) -> Option<LoadBalance> {
        match self {
            DecisionHandle::Rule(h) => h.load_balance(),
            DecisionHandle::Selector(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub selector: Arc<Selector>,
    pub rule: Option<Arc<Rule>>,
    pub handle: DecisionHandle,
    /// Picked when the selector pools upstreams.
    pub upstream: Option<Upstream>,
    /// Other selectors the `continued` chain matched, in order.
    pub additional: Vec<Arc<Selector>>,
}

impl RouteDecision {
    pub fn selector_id(&self) -> &str {
        &self.selector.id
    }

    pub fn rule_id(&self) -> Option<&str> {
        self.rule.as_deref().map(|r| r.id.as_str())
    }
}
