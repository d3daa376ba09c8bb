//! Comment event persistence and deduplication.
//!
//! The event store is the system's idempotency boundary: insertion is keyed
//! by the platform's comment id, so a duplicate delivery of the same comment
//! is a no-op that reports [`PersistOutcome::Duplicate`] and returns the
//! existing row. Only newly created events proceed to rule evaluation.

use super::StorageResult;
use crate::errors::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{Instrument, error};

/// One inbound comment observed on a linked account's media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentEvent {
    pub id: i64,

    pub instagram_account_id: i64,

    /// Platform-assigned comment id, globally unique. The dedup key.
    pub comment_id: String,

    pub media_id: String,

    pub commenter_id: String,

    pub commenter_username: Option<String>,

    pub comment_text: String,

    /// Platform-supplied comment timestamp, UTC.
    pub comment_timestamp: DateTime<Utc>,

    /// Set once rule evaluation fired at least one rule for this event.
    pub processed: bool,

    pub processed_at: Option<DateTime<Utc>>,

    pub media_type: Option<String>,

    /// Raw webhook entry snapshot, kept for audit and replay.
    pub webhook_data: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

/// Fields for a not-yet-persisted comment event.
#[derive(Debug, Clone)]
pub struct NewCommentEvent {
    pub instagram_account_id: i64,
    pub comment_id: String,
    pub media_id: String,
    pub commenter_id: String,
    pub commenter_username: Option<String>,
    pub comment_text: String,
    pub comment_timestamp: DateTime<Utc>,
    pub media_type: Option<String>,
    pub webhook_data: Option<serde_json::Value>,
}

/// Result of attempting to persist an inbound event.
#[derive(Debug, Clone)]
pub enum PersistOutcome {
    /// First sighting of this comment id; the event was stored.
    Created(CommentEvent),
    /// The comment id was already stored; the existing event is returned
    /// unchanged.
    Duplicate(CommentEvent),
}

impl PersistOutcome {
    pub fn event(&self) -> &CommentEvent {
        match self {
            PersistOutcome::Created(event) | PersistOutcome::Duplicate(event) => event,
        }
    }
}

/// Storage trait for comment events.
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Persists an inbound event, deduplicating on the platform comment id.
    async fn persist(&self, new_event: &NewCommentEvent) -> StorageResult<PersistOutcome>;

    /// Retrieves an event by id.
    async fn get_event(&self, id: i64) -> StorageResult<Option<CommentEvent>>;

    /// Commits the outcome of one event's rule evaluation: flips the event's
    /// `processed`/`processed_at` and increments `execution_count` and
    /// `last_executed` for every fired rule, all in a single transaction so a
    /// retried request cannot partially double-fire.
    async fn finalize(
        &self,
        event_id: i64,
        fired_rule_ids: &[i64],
        now: DateTime<Utc>,
    ) -> StorageResult<()>;
}

pub struct PostgresEventStorage {
    pool: PgPool,
}

impl PostgresEventStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: &sqlx::postgres::PgRow) -> CommentEvent {
    CommentEvent {
        id: row.get("id"),
        instagram_account_id: row.get("instagram_account_id"),
        comment_id: row.get("comment_id"),
        media_id: row.get("media_id"),
        commenter_id: row.get("commenter_id"),
        commenter_username: row.get("commenter_username"),
        comment_text: row.get("comment_text"),
        comment_timestamp: row.get("comment_timestamp"),
        processed: row.get("processed"),
        processed_at: row.get("processed_at"),
        media_type: row.get("media_type"),
        webhook_data: row.get("webhook_data"),
        created_at: row.get("created_at"),
    }
}

const EVENT_COLUMNS: &str = r#"
    id, instagram_account_id, comment_id, media_id, commenter_id,
    commenter_username, comment_text, comment_timestamp, processed,
    processed_at, media_type, webhook_data, created_at
"#;

#[async_trait]
impl EventStorage for PostgresEventStorage {
    async fn persist(&self, new_event: &NewCommentEvent) -> StorageResult<PersistOutcome> {
        let span = tracing::debug_span!("database_query", query = "INSERT comment event");

        // ON CONFLICT DO NOTHING returns no row for a duplicate, so a missing
        // row means the comment id was already stored.
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO comment_events (
                instagram_account_id, comment_id, media_id, commenter_id,
                commenter_username, comment_text, comment_timestamp,
                media_type, webhook_data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (comment_id) DO NOTHING
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(new_event.instagram_account_id)
        .bind(&new_event.comment_id)
        .bind(&new_event.media_id)
        .bind(&new_event.commenter_id)
        .bind(&new_event.commenter_username)
        .bind(&new_event.comment_text)
        .bind(new_event.comment_timestamp)
        .bind(&new_event.media_type)
        .bind(&new_event.webhook_data)
        .fetch_optional(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, comment_id = %new_event.comment_id, "Failed to persist event");
            StorageError::QueryFailed { source: e }
        })?;

        if let Some(row) = inserted {
            return Ok(PersistOutcome::Created(event_from_row(&row)));
        }

        let span = tracing::debug_span!("database_query", query = "SELECT duplicate event");
        let existing = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM comment_events
            WHERE comment_id = $1
            "#
        ))
        .bind(&new_event.comment_id)
        .fetch_one(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, comment_id = %new_event.comment_id, "Failed to load duplicate event");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(PersistOutcome::Duplicate(event_from_row(&existing)))
    }

    async fn get_event(&self, id: i64) -> StorageResult<Option<CommentEvent>> {
        let span = tracing::debug_span!("database_query", query = "SELECT event");

        let row = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM comment_events
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, event_id = id, "Failed to get event");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(row.as_ref().map(event_from_row))
    }

    async fn finalize(
        &self,
        event_id: i64,
        fired_rule_ids: &[i64],
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let span = tracing::debug_span!("database_query", query = "finalize event");

        async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StorageError::TransactionFailed { source: e })?;

            sqlx::query(
                r#"
                UPDATE comment_events
                SET processed = TRUE, processed_at = $2
                WHERE id = $1
                "#,
            )
            .bind(event_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!(error = ?e, event_id, "Failed to mark event processed");
                StorageError::QueryFailed { source: e }
            })?;

            for rule_id in fired_rule_ids {
                sqlx::query(
                    r#"
                    UPDATE automation_rules
                    SET execution_count = execution_count + 1, last_executed = $2
                    WHERE id = $1
                    "#,
                )
                .bind(rule_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!(error = ?e, rule_id, "Failed to update rule counters");
                    StorageError::QueryFailed { source: e }
                })?;
            }

            tx.commit()
                .await
                .map_err(|e| StorageError::TransactionFailed { source: e })
        }
        .instrument(span)
        .await
    }
}
