//! Automation rule model and storage.
//!
//! A rule is a user-authored trigger-and-response definition scoped to one
//! linked account: keyword list, match mode, optional public reply and
//! private message texts, priority, and optional execution-rate ceilings.
//! Rule CRUD lives outside the engine; the engine only reads active rules in
//! priority order and updates the execution counters as a side effect of
//! firing (see [`super::event::EventStorage::finalize`]).

use super::StorageResult;
use crate::errors::StorageError;
use crate::matcher::{MatchMode, split_keywords};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::{Instrument, error};

/// A user-authored trigger-and-response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: i64,

    pub instagram_account_id: i64,

    /// Unique within the owning account. Breaks priority ties when ordering
    /// rules for evaluation.
    pub name: String,

    /// Ordered keyword list. Comma-delimited at the storage boundary, split
    /// and trimmed on load.
    pub trigger_keywords: Vec<String>,

    pub match_mode: MatchMode,

    pub case_sensitive: bool,

    /// Similarity floor for fuzzy matching, 0.1 to 1.0. Ignored by other
    /// modes.
    pub fuzzy_threshold: Option<f64>,

    /// Public comment reply text. `None` means no reply action.
    pub public_response: Option<String>,

    /// Direct message text, only sent when `send_private_message` is set.
    pub private_message: Option<String>,

    pub send_private_message: bool,

    pub is_active: bool,

    /// 1 = highest, evaluated first.
    pub priority: i32,

    /// Optional execution ceiling per trailing hour. `None` = unlimited.
    pub max_executions_per_hour: Option<i32>,

    /// Optional execution ceiling per trailing day. `None` = unlimited.
    pub max_executions_per_day: Option<i32>,

    pub execution_count: i64,

    pub last_executed: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl AutomationRule {
    /// The reply text to dispatch. Blank text counts as unset.
    pub fn reply_text(&self) -> Option<&str> {
        self.public_response
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    /// The direct message text to dispatch, gated on the send flag. Blank
    /// text counts as unset.
    pub fn direct_message_text(&self) -> Option<&str> {
        if !self.send_private_message {
            return None;
        }
        self.private_message
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    /// A rule with nothing to dispatch is inert: it still matches, but it
    /// never fires and never touches the event or its own counters.
    pub fn is_inert(&self) -> bool {
        self.reply_text().is_none() && self.direct_message_text().is_none()
    }
}

/// Storage trait for the engine's read side of automation rules.
#[async_trait]
pub trait RuleStorage: Send + Sync {
    /// Lists active rules for an account, ordered by priority ascending with
    /// ties broken by name. This is the exact order the processor evaluates
    /// rules in.
    async fn active_rules_for_account(
        &self,
        account_id: i64,
    ) -> StorageResult<Vec<AutomationRule>>;
}

pub struct PostgresRuleStorage {
    pool: PgPool,
}

impl PostgresRuleStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn rule_from_row(row: &sqlx::postgres::PgRow) -> StorageResult<AutomationRule> {
    let match_type: String = row.get("match_type");
    let match_mode = MatchMode::from_str(&match_type).map_err(|e| StorageError::InvalidInput {
        details: e.to_string(),
    })?;

    let raw_keywords: String = row.get("trigger_keywords");

    Ok(AutomationRule {
        id: row.get("id"),
        instagram_account_id: row.get("instagram_account_id"),
        name: row.get("name"),
        trigger_keywords: split_keywords(&raw_keywords),
        match_mode,
        case_sensitive: row.get("case_sensitive"),
        fuzzy_threshold: row.get("fuzzy_threshold"),
        public_response: row.get("public_response"),
        private_message: row.get("private_message"),
        send_private_message: row.get("send_private_message"),
        is_active: row.get("is_active"),
        priority: row.get("priority"),
        max_executions_per_hour: row.get("max_executions_per_hour"),
        max_executions_per_day: row.get("max_executions_per_day"),
        execution_count: row.get("execution_count"),
        last_executed: row.get("last_executed"),
        created_at: row.get("created_at"),
    })
}

const RULE_COLUMNS: &str = r#"
    id, instagram_account_id, name, trigger_keywords, match_type,
    case_sensitive, fuzzy_threshold, public_response, private_message,
    send_private_message, is_active, priority, max_executions_per_hour,
    max_executions_per_day, execution_count, last_executed, created_at
"#;

#[async_trait]
impl RuleStorage for PostgresRuleStorage {
    async fn active_rules_for_account(
        &self,
        account_id: i64,
    ) -> StorageResult<Vec<AutomationRule>> {
        let span = tracing::debug_span!("database_query", query = "SELECT active rules");

        let rows = sqlx::query(&format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM automation_rules
            WHERE instagram_account_id = $1 AND is_active = TRUE
            ORDER BY priority ASC, name ASC
            "#
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, account_id, "Failed to list active rules");
            StorageError::QueryFailed { source: e }
        })?;

        rows.iter().map(rule_from_row).collect()
    }
}
