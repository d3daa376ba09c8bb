//! Rule execution throttling.
//!
//! This module provides traits and implementations for enforcing per-rule
//! execution-rate ceilings before an action is dispatched.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::storage::execution::ExecutionStorage;
use crate::storage::rule::AutomationRule;

/// Trait for throttling rule executions.
///
/// The decision is made once per (rule, event) before dispatch; it never
/// retroactively invalidates an execution already dispatched.
#[async_trait]
pub trait RuleThrottler: Send + Sync {
    /// Check whether a rule may fire at `now`.
    ///
    /// Returns `Ok(true)` when the rule is within its ceilings (or has none),
    /// `Ok(false)` when a ceiling is reached, or an error if the check fails.
    async fn may_fire(&self, rule: &AutomationRule, now: DateTime<Utc>) -> Result<bool>;
}

/// A no-op implementation of [`RuleThrottler`] that always allows firing.
#[derive(Debug, Clone, Default)]
pub struct NoOpRuleThrottler;

impl NoOpRuleThrottler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleThrottler for NoOpRuleThrottler {
    async fn may_fire(&self, _rule: &AutomationRule, _now: DateTime<Utc>) -> Result<bool> {
        Ok(true)
    }
}

/// Throttler that answers from stored execution history.
///
/// Counts the distinct events a rule fired for in the trailing hour and day
/// and compares each count exactly against the rule's optional ceilings. A
/// ceiling of `None` means unlimited on that axis. Callers must serialize the
/// check-then-dispatch sequence per account (see the processor) so concurrent
/// deliveries cannot under-count.
pub struct ExecutionWindowThrottler {
    executions: Arc<dyn ExecutionStorage>,
}

impl ExecutionWindowThrottler {
    pub fn new(executions: Arc<dyn ExecutionStorage>) -> Self {
        Self { executions }
    }
}

#[async_trait]
impl RuleThrottler for ExecutionWindowThrottler {
    async fn may_fire(&self, rule: &AutomationRule, now: DateTime<Utc>) -> Result<bool> {
        if rule.max_executions_per_hour.is_none() && rule.max_executions_per_day.is_none() {
            return Ok(true);
        }

        if let Some(limit) = rule.max_executions_per_hour {
            let since = now - Duration::hours(1);
            let fired = self.executions.count_fired_since(rule.id, since).await?;
            if fired >= limit.max(0) as u64 {
                return Ok(false);
            }
        }

        if let Some(limit) = rule.max_executions_per_day {
            let since = now - Duration::days(1);
            let fired = self.executions.count_fired_since(rule.id, since).await?;
            if fired >= limit.max(0) as u64 {
                return Ok(false);
            }
        }

        Ok(true)
    }
}
