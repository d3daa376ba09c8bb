//! Rule evaluation for freshly ingested comment events.
//!
//! For one event the processor loads the account's active rules in priority
//! order, runs each through the throttle and the matcher, dispatches the
//! configured actions for every matching rule, and commits the event's
//! processed flag together with the fired rules' counters in one transaction.
//!
//! Deliveries for the same account are serialized behind a per-account async
//! mutex so the throttle's check-then-dispatch sequence cannot under-count
//! when the platform sends a burst.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::dispatcher::ActionDispatcher;
use crate::errors::ProcessorError;
use crate::matcher::rule_matches;
use crate::metrics::SharedMetricsPublisher;
use crate::storage::{
    ActionExecution, AutomationRule, CommentEvent, EventStorage, InstagramAccount, RuleStorage,
};
use crate::throttle::RuleThrottler;

/// What one event's evaluation did, for logging and response bodies.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub rules_evaluated: usize,
    pub rules_matched: usize,
    pub rules_throttled: usize,
    pub fired_rule_ids: Vec<i64>,
    pub executions: Vec<ActionExecution>,
}

pub struct RuleProcessor {
    rules: Arc<dyn RuleStorage>,
    events: Arc<dyn EventStorage>,
    throttler: Arc<dyn RuleThrottler>,
    dispatcher: Arc<ActionDispatcher>,
    metrics: SharedMetricsPublisher,
    account_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl RuleProcessor {
    pub fn new(
        rules: Arc<dyn RuleStorage>,
        events: Arc<dyn EventStorage>,
        throttler: Arc<dyn RuleThrottler>,
        dispatcher: Arc<ActionDispatcher>,
        metrics: SharedMetricsPublisher,
    ) -> Self {
        Self {
            rules,
            events,
            throttler,
            dispatcher,
            metrics,
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn account_lock(&self, account_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.account_locks.lock().await;
        locks.entry(account_id).or_default().clone()
    }

    /// Drops the account's lock entry once no other task holds a clone, so
    /// the map tracks only accounts with in-flight evaluations.
    async fn release_account_lock(&self, account_id: i64) {
        let mut locks = self.account_locks.lock().await;
        if locks
            .get(&account_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&account_id);
        }
    }

    /// Evaluate every active rule of `account` against `event`.
    ///
    /// Called once per newly created event; duplicates never reach here.
    pub async fn process(
        &self,
        account: &InstagramAccount,
        event: &CommentEvent,
    ) -> Result<ProcessReport, ProcessorError> {
        let lock = self.account_lock(account.id).await;
        let result = {
            let _guard = lock.lock().await;
            self.evaluate(account, event).await
        };
        drop(lock);
        self.release_account_lock(account.id).await;
        result
    }

    async fn evaluate(
        &self,
        account: &InstagramAccount,
        event: &CommentEvent,
    ) -> Result<ProcessReport, ProcessorError> {
        let Some(access_token) = account.access_token.as_deref() else {
            warn!(
                account_id = account.id,
                event_id = event.id,
                "Account has no access token, skipping evaluation"
            );
            return Ok(ProcessReport::default());
        };

        let rules = self
            .rules
            .active_rules_for_account(account.id)
            .await
            .map_err(|source| ProcessorError::RuleLookupFailed {
                account_id: account.id,
                source,
            })?;

        let mut report = ProcessReport {
            rules_evaluated: rules.len(),
            ..ProcessReport::default()
        };

        for rule in &rules {
            let now = Utc::now();

            match self.throttler.may_fire(rule, now).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(rule_id = rule.id, event_id = event.id, "Rule at rate ceiling");
                    self.metrics.incr("processor.rule_throttled").await;
                    report.rules_throttled += 1;
                    continue;
                }
                Err(e) => {
                    // A broken throttle check must not silence the rule.
                    warn!(rule_id = rule.id, error = %e, "Throttle check failed, allowing rule");
                }
            }

            match rule_matches(rule, &event.comment_text) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(rule_id = rule.id, error = %e, "Skipping rule with invalid pattern");
                    self.metrics.incr("processor.rule_invalid_pattern").await;
                    continue;
                }
            }

            report.rules_matched += 1;

            if rule.is_inert() {
                debug!(rule_id = rule.id, event_id = event.id, "Matched rule has no actions");
                continue;
            }

            self.fire(access_token, event, rule, &mut report).await?;
        }

        if !report.fired_rule_ids.is_empty() {
            self.events
                .finalize(event.id, &report.fired_rule_ids, Utc::now())
                .await
                .map_err(|source| ProcessorError::FinalizeFailed {
                    event_id: event.id,
                    source,
                })?;
        }

        self.metrics.incr("processor.events_evaluated").await;
        self.metrics
            .count("processor.rules_fired", report.fired_rule_ids.len() as u64)
            .await;

        info!(
            event_id = event.id,
            account_id = account.id,
            rules_evaluated = report.rules_evaluated,
            rules_matched = report.rules_matched,
            rules_fired = report.fired_rule_ids.len(),
            "Event evaluated"
        );

        Ok(report)
    }

    async fn fire(
        &self,
        access_token: &str,
        event: &CommentEvent,
        rule: &AutomationRule,
        report: &mut ProcessReport,
    ) -> Result<(), ProcessorError> {
        if let Some(text) = rule.reply_text() {
            let execution = self
                .dispatcher
                .dispatch_reply(access_token, event, rule.id, text)
                .await?;
            report.executions.push(execution);
        }

        if let Some(text) = rule.direct_message_text() {
            let execution = self
                .dispatcher
                .dispatch_direct_message(access_token, event, rule.id, text)
                .await?;
            report.executions.push(execution);
        }

        report.fired_rule_ids.push(rule.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoOpMetricsPublisher;
    use crate::storage::{ActionType, ExecutionStatus};
    use crate::test_helpers::{
        InMemoryEventStorage, InMemoryExecutionStorage, InMemoryRuleStorage, InMemoryState,
        RecordingPlatformClient, test_account, test_event, test_rule,
    };
    use crate::throttle::ExecutionWindowThrottler;

    struct Harness {
        processor: RuleProcessor,
        client: Arc<RecordingPlatformClient>,
        state: Arc<InMemoryState>,
    }

    fn harness() -> Harness {
        let state = InMemoryState::shared();
        let client = Arc::new(RecordingPlatformClient::new());
        let executions = Arc::new(InMemoryExecutionStorage::new(state.clone()));
        let dispatcher = Arc::new(ActionDispatcher::new(
            client.clone(),
            executions.clone(),
            Arc::new(NoOpMetricsPublisher::new()),
        ));
        let processor = RuleProcessor::new(
            Arc::new(InMemoryRuleStorage::new(state.clone())),
            Arc::new(InMemoryEventStorage::new(state.clone())),
            Arc::new(ExecutionWindowThrottler::new(executions)),
            dispatcher,
            Arc::new(NoOpMetricsPublisher::new()),
        );
        Harness {
            processor,
            client,
            state,
        }
    }

    #[tokio::test]
    async fn test_matching_rule_fires_reply_and_dm() {
        let h = harness();
        let account = test_account(1, "ig-1");
        let mut rule = test_rule(7, 1, "thanks-rule", "thanks");
        rule.public_response = Some("You're welcome!".to_string());
        rule.private_message = Some("Check your inbox".to_string());
        rule.send_private_message = true;
        h.state.add_rule(rule);

        let event = test_event(10, 1, "c1", "commenter-1", "thanks for this!");
        h.state.add_event(event.clone());

        let report = h.processor.process(&account, &event).await.unwrap();

        assert_eq!(report.rules_matched, 1);
        assert_eq!(report.fired_rule_ids, vec![7]);
        assert_eq!(report.executions.len(), 2);
        assert!(report
            .executions
            .iter()
            .all(|e| e.status == ExecutionStatus::Success));

        assert_eq!(h.client.replies().len(), 1);
        assert_eq!(h.client.direct_messages().len(), 1);

        // Finalize committed the processed flag and the rule counter.
        let stored = h.state.event(10).unwrap();
        assert!(stored.processed);
        assert!(stored.processed_at.is_some());
        assert_eq!(h.state.rule(7).unwrap().execution_count, 1);
    }

    #[tokio::test]
    async fn test_priority_order_decides_dispatch_order() {
        let h = harness();
        let account = test_account(1, "ig-1");

        // Created "second" but priority 1, so it fires first.
        let mut first = test_rule(2, 1, "zz-first", "hello");
        first.priority = 1;
        first.public_response = Some("first".to_string());
        let mut second = test_rule(1, 1, "aa-second", "hello");
        second.priority = 2;
        second.public_response = Some("second".to_string());
        h.state.add_rule(second);
        h.state.add_rule(first);

        let event = test_event(10, 1, "c1", "commenter-1", "hello there");
        h.state.add_event(event.clone());

        let report = h.processor.process(&account, &event).await.unwrap();

        assert_eq!(report.fired_rule_ids, vec![2, 1]);
        let replies = h.client.replies();
        assert_eq!(replies[0].1, "first");
        assert_eq!(replies[1].1, "second");
    }

    #[tokio::test]
    async fn test_throttled_rule_is_skipped_without_counter_change() {
        let h = harness();
        let account = test_account(1, "ig-1");
        let mut rule = test_rule(7, 1, "limited", "thanks");
        rule.public_response = Some("You're welcome!".to_string());
        rule.max_executions_per_hour = Some(1);
        h.state.add_rule(rule);

        let first = test_event(10, 1, "c1", "commenter-1", "thanks!");
        h.state.add_event(first.clone());
        h.processor.process(&account, &first).await.unwrap();
        assert_eq!(h.state.rule(7).unwrap().execution_count, 1);

        let second = test_event(11, 1, "c2", "commenter-2", "thanks again!");
        h.state.add_event(second.clone());
        let report = h.processor.process(&account, &second).await.unwrap();

        assert_eq!(report.rules_throttled, 1);
        assert!(report.fired_rule_ids.is_empty());
        assert_eq!(h.client.replies().len(), 1);
        // The skip leaves the rule counter and the second event untouched.
        assert_eq!(h.state.rule(7).unwrap().execution_count, 1);
        assert!(!h.state.event(11).unwrap().processed);
    }

    #[tokio::test]
    async fn test_invalid_regex_rule_skipped_others_still_run() {
        let h = harness();
        let account = test_account(1, "ig-1");

        let mut broken = test_rule(1, 1, "broken", "([unclosed");
        broken.match_mode = crate::matcher::MatchMode::Regex;
        broken.priority = 1;
        broken.public_response = Some("never".to_string());
        let mut good = test_rule(2, 1, "good", "hello");
        good.priority = 2;
        good.public_response = Some("hi!".to_string());
        h.state.add_rule(broken);
        h.state.add_rule(good);

        let event = test_event(10, 1, "c1", "commenter-1", "hello there");
        h.state.add_event(event.clone());

        let report = h.processor.process(&account, &event).await.unwrap();
        assert_eq!(report.fired_rule_ids, vec![2]);
    }

    #[tokio::test]
    async fn test_inert_rule_matches_as_noop() {
        let h = harness();
        let account = test_account(1, "ig-1");
        h.state.add_rule(test_rule(7, 1, "inert", "thanks"));

        let event = test_event(10, 1, "c1", "commenter-1", "thanks!");
        h.state.add_event(event.clone());

        let report = h.processor.process(&account, &event).await.unwrap();
        assert_eq!(report.rules_matched, 1);
        assert!(report.fired_rule_ids.is_empty());
        assert!(report.executions.is_empty());
        assert!(!h.state.event(10).unwrap().processed);
    }

    #[tokio::test]
    async fn test_blank_response_rule_is_inert() {
        let h = harness();
        let account = test_account(1, "ig-1");
        let mut rule = test_rule(7, 1, "blank", "thanks");
        rule.public_response = Some("   ".to_string());
        rule.private_message = Some(String::new());
        rule.send_private_message = true;
        h.state.add_rule(rule);

        let event = test_event(10, 1, "c1", "commenter-1", "thanks!");
        h.state.add_event(event.clone());

        let report = h.processor.process(&account, &event).await.unwrap();

        // Whitespace-only texts dispatch nothing, so the rule must not count
        // as fired either: no counter bump, no processed flag, no rows.
        assert_eq!(report.rules_matched, 1);
        assert!(report.fired_rule_ids.is_empty());
        assert!(report.executions.is_empty());
        assert!(h.client.replies().is_empty());
        assert!(h.client.direct_messages().is_empty());
        assert_eq!(h.state.rule(7).unwrap().execution_count, 0);
        assert!(!h.state.event(10).unwrap().processed);
    }

    #[tokio::test]
    async fn test_account_lock_is_released_after_evaluation() {
        let h = harness();
        let account = test_account(1, "ig-1");
        let event = test_event(10, 1, "c1", "commenter-1", "hello");
        h.state.add_event(event.clone());

        h.processor.process(&account, &event).await.unwrap();

        assert!(h.processor.account_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_dispatch_still_counts_as_fired() {
        let h = harness();
        h.client.fail_replies();
        let account = test_account(1, "ig-1");
        let mut rule = test_rule(7, 1, "thanks-rule", "thanks");
        rule.public_response = Some("You're welcome!".to_string());
        h.state.add_rule(rule);

        let event = test_event(10, 1, "c1", "commenter-1", "thanks!");
        h.state.add_event(event.clone());

        let report = h.processor.process(&account, &event).await.unwrap();
        assert_eq!(report.fired_rule_ids, vec![7]);
        assert_eq!(report.executions[0].status, ExecutionStatus::Failed);
        assert_eq!(report.executions[0].action_type, ActionType::PublicReply);
    }
}
