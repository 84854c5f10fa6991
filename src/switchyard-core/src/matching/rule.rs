use std::sync::Arc;

use tracing::{debug, info};

use super::{conditions_hold, CompiledCondition};
use crate::context::RequestContext;
use crate::models::{Rule, RuleHandle};

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Arc<Rule>,
    pub handle: RuleHandle,
    conditions: Vec<CompiledCondition>,
}

impl CompiledRule {
    pub fn compile(rule: Rule, plugin_name: &str) -> Self {
        let handle = RuleHandle::parse(plugin_name, rule.handle.as_deref());
        let conditions = rule.conditions.iter().map(CompiledCondition::compile).collect();
        Self {
            rule: Arc::new(rule),
            handle,
            conditions,
        }
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    pub fn matches(&self, ctx: &RequestContext) -> bool {
        self.rule.enabled && conditions_hold(self.rule.match_mode, &self.conditions, ctx)
    }

    fn rank(&self) -> (i32, &str) {
        (self.rule.sort, self.rule.id.as_str())
    }
}

pub fn sort_rules(list: &mut [Arc<CompiledRule>]) {
    list.sort_by(|a, b| a.rank().cmp(&b.rank()));
}

/// The matching rule with the lowest sort value (ties by id), if any.
pub fn match_rule<'a>(rules: &'a [Arc<CompiledRule>], ctx: &RequestContext) -> Option<&'a Arc<CompiledRule>> {
    let found = if rules.is_sorted_by(|a, b| a.rank() <= b.rank()) {
        rules.iter().find(|r| r.matches(ctx))
    } else {
        rules
            .iter()
            .filter(|r| r.matches(ctx))
            .min_by(|a, b| a.rank().cmp(&b.rank()))
    };

    if let Some(rule) = found {
        if rule.rule.logged {
            info!(
                selector = %rule.rule.selector_id,
                rule = %rule.id(),
                name = %rule.rule.name,
                path = %ctx.path(),
                "rule matched"
            );
        } else {
            debug!(rule = %rule.id(), path = %ctx.path(), "rule matched");
        }
    }
    found
}
