//! Action execution records.
//!
//! Every outbound reply/DM attempt is wrapped in an [`ActionExecution`] row
//! with retry metadata. The status state machine is
//! `pending -> success | failed -> retrying -> success | failed`; `retrying`
//! is transient and always carries a future `next_retry_at`.

use super::StorageResult;
use crate::errors::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::fmt;
use std::str::FromStr;
use tracing::{Instrument, error};

/// The kind of outbound action an execution record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    PublicReply,
    PrivateMessage,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::PublicReply => "public_reply",
            ActionType::PrivateMessage => "private_message",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "public_reply" => Ok(ActionType::PublicReply),
            "private_message" => Ok(ActionType::PrivateMessage),
            other => Err(StorageError::InvalidInput {
                details: format!("Unknown action type: {other}"),
            }),
        }
    }
}

/// Execution status. `Success` and `Failed` are terminal for the synchronous
/// path; the retry sweep moves eligible `Failed` rows through `Retrying`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Success,
    Failed,
    Retrying,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Retrying => "retrying",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ExecutionStatus::Pending),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "retrying" => Ok(ExecutionStatus::Retrying),
            other => Err(StorageError::InvalidInput {
                details: format!("Unknown execution status: {other}"),
            }),
        }
    }
}

/// The record of one attempt to perform an outbound action for one
/// (event, rule) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecution {
    pub id: i64,
    pub comment_event_id: i64,
    pub automation_rule_id: i64,
    pub action_type: ActionType,
    pub status: ExecutionStatus,

    /// The response text that was (or will be) sent.
    pub response_text: Option<String>,

    /// Platform-assigned id of the posted response, when available.
    pub response_id: Option<String>,

    pub error_message: Option<String>,

    pub retry_count: i32,

    pub next_retry_at: Option<DateTime<Utc>>,

    pub execution_time_ms: Option<i64>,

    pub executed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Storage trait for action execution records.
#[async_trait]
pub trait ExecutionStorage: Send + Sync {
    /// Creates a `pending` record at the start of a dispatch.
    async fn create_pending(
        &self,
        comment_event_id: i64,
        automation_rule_id: i64,
        action_type: ActionType,
        response_text: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ActionExecution>;

    /// Records the synchronous outcome of a dispatch attempt.
    async fn record_outcome(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        error_message: Option<&str>,
        execution_time_ms: i64,
        executed_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Counts distinct events a rule fired for since `since`. One firing may
    /// create both a reply and a DM row, so the rate limiter counts events,
    /// not rows.
    async fn count_fired_since(
        &self,
        automation_rule_id: i64,
        since: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Closes an execution as permanently failed. `retry_count` must be at
    /// or above the sweep's attempt ceiling; that is what keeps the row out
    /// of [`ExecutionStorage::due_for_retry`] from then on.
    async fn mark_terminal(
        &self,
        execution_id: i64,
        retry_count: i32,
        error_message: &str,
        execution_time_ms: i64,
        executed_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Moves a failed execution into `retrying` with the next attempt time.
    async fn schedule_retry(
        &self,
        execution_id: i64,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Lists `failed`/`retrying` executions whose next attempt is due and
    /// whose attempt budget is not exhausted, oldest first.
    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        max_retries: i32,
        limit: i64,
    ) -> StorageResult<Vec<ActionExecution>>;
}

pub struct PostgresExecutionStorage {
    pool: PgPool,
}

impl PostgresExecutionStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn execution_from_row(row: &sqlx::postgres::PgRow) -> StorageResult<ActionExecution> {
    let action_type: String = row.get("action_type");
    let status: String = row.get("status");

    Ok(ActionExecution {
        id: row.get("id"),
        comment_event_id: row.get("comment_event_id"),
        automation_rule_id: row.get("automation_rule_id"),
        action_type: action_type.parse()?,
        status: status.parse()?,
        response_text: row.get("response_text"),
        response_id: row.get("response_id"),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        next_retry_at: row.get("next_retry_at"),
        execution_time_ms: row.get("execution_time_ms"),
        executed_at: row.get("executed_at"),
        created_at: row.get("created_at"),
    })
}

const EXECUTION_COLUMNS: &str = r#"
    id, comment_event_id, automation_rule_id, action_type, status,
    response_text, response_id, error_message, retry_count, next_retry_at,
    execution_time_ms, executed_at, created_at
"#;

#[async_trait]
impl ExecutionStorage for PostgresExecutionStorage {
    async fn create_pending(
        &self,
        comment_event_id: i64,
        automation_rule_id: i64,
        action_type: ActionType,
        response_text: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ActionExecution> {
        let span = tracing::debug_span!("database_query", query = "INSERT execution");

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO action_executions (
                comment_event_id, automation_rule_id, action_type, status,
                response_text, retry_count, created_at
            )
            VALUES ($1, $2, $3, 'pending', $4, 0, $5)
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(comment_event_id)
        .bind(automation_rule_id)
        .bind(action_type.as_str())
        .bind(response_text)
        .bind(now)
        .fetch_one(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, comment_event_id, automation_rule_id, "Failed to create execution");
            StorageError::QueryFailed { source: e }
        })?;

        execution_from_row(&row)
    }

    async fn record_outcome(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        error_message: Option<&str>,
        execution_time_ms: i64,
        executed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let span = tracing::debug_span!("database_query", query = "UPDATE execution outcome");

        sqlx::query(
            r#"
            UPDATE action_executions
            SET status = $2, error_message = $3, execution_time_ms = $4,
                executed_at = $5, next_retry_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(execution_time_ms)
        .bind(executed_at)
        .execute(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, execution_id, "Failed to record execution outcome");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }

    async fn count_fired_since(
        &self,
        automation_rule_id: i64,
        since: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let span = tracing::debug_span!("database_query", query = "COUNT executions in window");

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT comment_event_id)
            FROM action_executions
            WHERE automation_rule_id = $1 AND created_at >= $2
            "#,
        )
        .bind(automation_rule_id)
        .bind(since)
        .fetch_one(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, automation_rule_id, "Failed to count executions");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(count as u64)
    }

    async fn mark_terminal(
        &self,
        execution_id: i64,
        retry_count: i32,
        error_message: &str,
        execution_time_ms: i64,
        executed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let span = tracing::debug_span!("database_query", query = "UPDATE execution terminal");

        sqlx::query(
            r#"
            UPDATE action_executions
            SET status = 'failed', retry_count = $2, error_message = $3,
                execution_time_ms = $4, executed_at = $5, next_retry_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(retry_count)
        .bind(error_message)
        .bind(execution_time_ms)
        .bind(executed_at)
        .execute(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, execution_id, "Failed to close execution");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }

    async fn schedule_retry(
        &self,
        execution_id: i64,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let span = tracing::debug_span!("database_query", query = "UPDATE execution retry");

        sqlx::query(
            r#"
            UPDATE action_executions
            SET status = 'retrying', retry_count = $2, next_retry_at = $3
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(retry_count)
        .bind(next_retry_at)
        .execute(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, execution_id, "Failed to schedule retry");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        max_retries: i32,
        limit: i64,
    ) -> StorageResult<Vec<ActionExecution>> {
        let span = tracing::debug_span!("database_query", query = "SELECT retry candidates");

        let rows = sqlx::query(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM action_executions
            WHERE status IN ('failed', 'retrying')
              AND retry_count < $1
              AND (next_retry_at IS NULL OR next_retry_at <= $2)
            ORDER BY created_at ASC
            LIMIT $3
            "#
        ))
        .bind(max_retries)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, "Failed to list retry candidates");
            StorageError::QueryFailed { source: e }
        })?;

        rows.iter().map(execution_from_row).collect()
    }
}
