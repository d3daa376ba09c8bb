//! Shared in-memory fakes and fixture builders for unit tests.
//!
//! One [`InMemoryState`] backs all the storage fakes, so a test can wire
//! several traits to the same data and assert on it afterwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::matcher::MatchMode;
use crate::platform::{AccountInfo, PlatformClient};
use crate::storage::{
    AccountStorage, ActionExecution, ActionType, AutomationRule, CommentEvent, EventStorage,
    ExecutionStatus, ExecutionStorage, InstagramAccount, NewCommentEvent, PersistOutcome,
    RuleStorage, StorageResult,
};

pub fn test_account(id: i64, instagram_user_id: &str) -> InstagramAccount {
    InstagramAccount {
        id,
        instagram_user_id: instagram_user_id.to_string(),
        username: format!("account-{id}"),
        access_token: Some("test-token".to_string()),
        is_active: true,
        created_at: Utc::now(),
    }
}

pub fn test_rule(id: i64, account_id: i64, name: &str, keywords: &str) -> AutomationRule {
    AutomationRule {
        id,
        instagram_account_id: account_id,
        name: name.to_string(),
        trigger_keywords: crate::matcher::split_keywords(keywords),
        match_mode: MatchMode::Partial,
        case_sensitive: false,
        fuzzy_threshold: None,
        public_response: None,
        private_message: None,
        send_private_message: false,
        is_active: true,
        priority: 1,
        max_executions_per_hour: None,
        max_executions_per_day: None,
        execution_count: 0,
        last_executed: None,
        created_at: Utc::now(),
    }
}

pub fn test_event(
    id: i64,
    account_id: i64,
    comment_id: &str,
    commenter_id: &str,
    text: &str,
) -> CommentEvent {
    CommentEvent {
        id,
        instagram_account_id: account_id,
        comment_id: comment_id.to_string(),
        media_id: "m1".to_string(),
        commenter_id: commenter_id.to_string(),
        commenter_username: Some("fan".to_string()),
        comment_text: text.to_string(),
        comment_timestamp: Utc::now(),
        processed: false,
        processed_at: None,
        media_type: Some("IMAGE".to_string()),
        webhook_data: None,
        created_at: Utc::now(),
    }
}

/// Backing data shared by the in-memory storage fakes.
#[derive(Default)]
pub struct InMemoryState {
    accounts: Mutex<Vec<InstagramAccount>>,
    rules: Mutex<Vec<AutomationRule>>,
    events: Mutex<Vec<CommentEvent>>,
    executions: Mutex<Vec<ActionExecution>>,
}

impl InMemoryState {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_account(&self, account: InstagramAccount) {
        self.accounts.lock().push(account);
    }

    pub fn add_rule(&self, rule: AutomationRule) {
        self.rules.lock().push(rule);
    }

    pub fn rule(&self, id: i64) -> Option<AutomationRule> {
        self.rules.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn add_event(&self, event: CommentEvent) {
        self.events.lock().push(event);
    }

    pub fn event(&self, id: i64) -> Option<CommentEvent> {
        self.events.lock().iter().find(|e| e.id == id).cloned()
    }

    pub fn events(&self) -> Vec<CommentEvent> {
        self.events.lock().clone()
    }

    /// Seed one execution row directly, bypassing `create_pending`.
    pub fn add_execution(
        &self,
        comment_event_id: i64,
        automation_rule_id: i64,
        action_type: ActionType,
        created_at: DateTime<Utc>,
    ) -> i64 {
        let mut executions = self.executions.lock();
        let id = executions.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        executions.push(ActionExecution {
            id,
            comment_event_id,
            automation_rule_id,
            action_type,
            status: ExecutionStatus::Success,
            response_text: None,
            response_id: None,
            error_message: None,
            retry_count: 0,
            next_retry_at: None,
            execution_time_ms: None,
            executed_at: Some(created_at),
            created_at,
        });
        id
    }

    pub fn execution(&self, id: i64) -> Option<ActionExecution> {
        self.executions.lock().iter().find(|e| e.id == id).cloned()
    }

    pub fn set_execution_status(
        &self,
        id: i64,
        status: ExecutionStatus,
        response_text: Option<&str>,
    ) {
        let mut executions = self.executions.lock();
        if let Some(execution) = executions.iter_mut().find(|e| e.id == id) {
            execution.status = status;
            execution.response_text = response_text.map(String::from);
        }
    }

    pub fn set_execution_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
    ) {
        let mut executions = self.executions.lock();
        if let Some(execution) = executions.iter_mut().find(|e| e.id == id) {
            execution.retry_count = retry_count;
            execution.next_retry_at = next_retry_at;
        }
    }
}

pub struct InMemoryAccountStorage {
    state: Arc<InMemoryState>,
}

impl InMemoryAccountStorage {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl AccountStorage for InMemoryAccountStorage {
    async fn get_account(&self, id: i64) -> StorageResult<Option<InstagramAccount>> {
        Ok(self
            .state
            .accounts
            .lock()
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn find_by_instagram_user_id(
        &self,
        instagram_user_id: &str,
    ) -> StorageResult<Option<InstagramAccount>> {
        Ok(self
            .state
            .accounts
            .lock()
            .iter()
            .find(|a| a.instagram_user_id == instagram_user_id)
            .cloned())
    }
}

pub struct InMemoryRuleStorage {
    state: Arc<InMemoryState>,
}

impl InMemoryRuleStorage {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl RuleStorage for InMemoryRuleStorage {
    async fn active_rules_for_account(
        &self,
        account_id: i64,
    ) -> StorageResult<Vec<AutomationRule>> {
        let mut rules: Vec<AutomationRule> = self
            .state
            .rules
            .lock()
            .iter()
            .filter(|r| r.instagram_account_id == account_id && r.is_active)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.name.cmp(&b.name)));
        Ok(rules)
    }
}

pub struct InMemoryEventStorage {
    state: Arc<InMemoryState>,
}

impl InMemoryEventStorage {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl EventStorage for InMemoryEventStorage {
    async fn persist(&self, new_event: &NewCommentEvent) -> StorageResult<PersistOutcome> {
        let mut events = self.state.events.lock();
        if let Some(existing) = events.iter().find(|e| e.comment_id == new_event.comment_id) {
            return Ok(PersistOutcome::Duplicate(existing.clone()));
        }

        let id = events.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        let event = CommentEvent {
            id,
            instagram_account_id: new_event.instagram_account_id,
            comment_id: new_event.comment_id.clone(),
            media_id: new_event.media_id.clone(),
            commenter_id: new_event.commenter_id.clone(),
            commenter_username: new_event.commenter_username.clone(),
            comment_text: new_event.comment_text.clone(),
            comment_timestamp: new_event.comment_timestamp,
            processed: false,
            processed_at: None,
            media_type: new_event.media_type.clone(),
            webhook_data: new_event.webhook_data.clone(),
            created_at: Utc::now(),
        };
        events.push(event.clone());
        Ok(PersistOutcome::Created(event))
    }

    async fn get_event(&self, id: i64) -> StorageResult<Option<CommentEvent>> {
        Ok(self.state.event(id))
    }

    async fn finalize(
        &self,
        event_id: i64,
        fired_rule_ids: &[i64],
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        {
            let mut events = self.state.events.lock();
            if let Some(event) = events.iter_mut().find(|e| e.id == event_id) {
                event.processed = true;
                event.processed_at = Some(now);
            }
        }
        let mut rules = self.state.rules.lock();
        for rule_id in fired_rule_ids {
            if let Some(rule) = rules.iter_mut().find(|r| r.id == *rule_id) {
                rule.execution_count += 1;
                rule.last_executed = Some(now);
            }
        }
        Ok(())
    }
}

pub struct InMemoryExecutionStorage {
    state: Arc<InMemoryState>,
}

impl InMemoryExecutionStorage {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ExecutionStorage for InMemoryExecutionStorage {
    async fn create_pending(
        &self,
        comment_event_id: i64,
        automation_rule_id: i64,
        action_type: ActionType,
        response_text: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ActionExecution> {
        let mut executions = self.state.executions.lock();
        let id = executions.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        let execution = ActionExecution {
            id,
            comment_event_id,
            automation_rule_id,
            action_type,
            status: ExecutionStatus::Pending,
            response_text: Some(response_text.to_string()),
            response_id: None,
            error_message: None,
            retry_count: 0,
            next_retry_at: None,
            execution_time_ms: None,
            executed_at: None,
            created_at: now,
        };
        executions.push(execution.clone());
        Ok(execution)
    }

    async fn record_outcome(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        error_message: Option<&str>,
        execution_time_ms: i64,
        executed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut executions = self.state.executions.lock();
        if let Some(execution) = executions.iter_mut().find(|e| e.id == execution_id) {
            execution.status = status;
            execution.error_message = error_message.map(String::from);
            execution.execution_time_ms = Some(execution_time_ms);
            execution.executed_at = Some(executed_at);
            execution.next_retry_at = None;
        }
        Ok(())
    }

    async fn count_fired_since(
        &self,
        automation_rule_id: i64,
        since: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let executions = self.state.executions.lock();
        let mut event_ids: Vec<i64> = executions
            .iter()
            .filter(|e| e.automation_rule_id == automation_rule_id && e.created_at >= since)
            .map(|e| e.comment_event_id)
            .collect();
        event_ids.sort_unstable();
        event_ids.dedup();
        Ok(event_ids.len() as u64)
    }

    async fn mark_terminal(
        &self,
        execution_id: i64,
        retry_count: i32,
        error_message: &str,
        execution_time_ms: i64,
        executed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut executions = self.state.executions.lock();
        if let Some(execution) = executions.iter_mut().find(|e| e.id == execution_id) {
            execution.status = ExecutionStatus::Failed;
            execution.retry_count = retry_count;
            execution.error_message = Some(error_message.to_string());
            execution.execution_time_ms = Some(execution_time_ms);
            execution.executed_at = Some(executed_at);
            execution.next_retry_at = None;
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        execution_id: i64,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut executions = self.state.executions.lock();
        if let Some(execution) = executions.iter_mut().find(|e| e.id == execution_id) {
            execution.status = ExecutionStatus::Retrying;
            execution.retry_count = retry_count;
            execution.next_retry_at = Some(next_retry_at);
        }
        Ok(())
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        max_retries: i32,
        limit: i64,
    ) -> StorageResult<Vec<ActionExecution>> {
        let executions = self.state.executions.lock();
        let mut due: Vec<ActionExecution> = executions
            .iter()
            .filter(|e| {
                matches!(e.status, ExecutionStatus::Failed | ExecutionStatus::Retrying)
                    && e.retry_count < max_retries
                    && e.next_retry_at.is_none_or(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|e| e.created_at);
        due.truncate(limit as usize);
        Ok(due)
    }
}

/// Platform client fake that records calls and answers with configurable
/// success flags.
pub struct RecordingPlatformClient {
    reply_ok: AtomicBool,
    dm_ok: AtomicBool,
    replies: Mutex<Vec<(String, String)>>,
    direct_messages: Mutex<Vec<(String, String)>>,
}

impl RecordingPlatformClient {
    pub fn new() -> Self {
        Self {
            reply_ok: AtomicBool::new(true),
            dm_ok: AtomicBool::new(true),
            replies: Mutex::new(Vec::new()),
            direct_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_replies(&self) {
        self.reply_ok.store(false, Ordering::SeqCst);
    }

    pub fn fail_direct_messages(&self) {
        self.dm_ok.store(false, Ordering::SeqCst);
    }

    /// (comment id, text) pairs in dispatch order.
    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().clone()
    }

    /// (recipient id, text) pairs in dispatch order.
    pub fn direct_messages(&self) -> Vec<(String, String)> {
        self.direct_messages.lock().clone()
    }
}

#[async_trait]
impl PlatformClient for RecordingPlatformClient {
    async fn get_account_info(&self, _access_token: &str) -> Option<AccountInfo> {
        Some(AccountInfo {
            id: "test-user".to_string(),
            username: "testaccount".to_string(),
            account_type: Some("BUSINESS".to_string()),
            media_count: Some(1),
            followers_count: Some(10),
            follows_count: Some(5),
        })
    }

    async fn post_reply(&self, _access_token: &str, comment_id: &str, message: &str) -> bool {
        self.replies
            .lock()
            .push((comment_id.to_string(), message.to_string()));
        self.reply_ok.load(Ordering::SeqCst)
    }

    async fn send_direct_message(
        &self,
        _access_token: &str,
        recipient_id: &str,
        message: &str,
    ) -> bool {
        self.direct_messages
            .lock()
            .push((recipient_id.to_string(), message.to_string()));
        self.dm_ok.load(Ordering::SeqCst)
    }
}
