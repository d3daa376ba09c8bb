//! Linked Instagram account lookup.
//!
//! The engine treats account linking as an external concern; it only needs to
//! resolve the owning account for an inbound webhook entry and read its
//! access credential.

use super::StorageResult;
use crate::errors::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{Instrument, error};

/// A linked Instagram account with its API credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramAccount {
    pub id: i64,

    /// Instagram-assigned user id, the key webhook entries are resolved by.
    pub instagram_user_id: String,

    pub username: String,

    /// Graph API access token. An account without a token is linked but not
    /// actionable; the ingress drops its entries.
    pub access_token: Option<String>,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}

/// Storage trait for account resolution.
#[async_trait]
pub trait AccountStorage: Send + Sync {
    /// Retrieves an account by its internal id.
    async fn get_account(&self, id: i64) -> StorageResult<Option<InstagramAccount>>;

    /// Resolves an account by the Instagram-assigned user id carried in
    /// webhook entries. Returns `None` when no account is linked.
    async fn find_by_instagram_user_id(
        &self,
        instagram_user_id: &str,
    ) -> StorageResult<Option<InstagramAccount>>;
}

pub struct PostgresAccountStorage {
    pool: PgPool,
}

impl PostgresAccountStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> InstagramAccount {
    InstagramAccount {
        id: row.get("id"),
        instagram_user_id: row.get("instagram_user_id"),
        username: row.get("username"),
        access_token: row.get("access_token"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl AccountStorage for PostgresAccountStorage {
    async fn get_account(&self, id: i64) -> StorageResult<Option<InstagramAccount>> {
        let span = tracing::debug_span!("database_query", query = "SELECT account by id");

        let row = sqlx::query(
            r#"
            SELECT id, instagram_user_id, username, access_token, is_active, created_at
            FROM instagram_accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, account_id = id, "Failed to get account");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(row.as_ref().map(account_from_row))
    }

    async fn find_by_instagram_user_id(
        &self,
        instagram_user_id: &str,
    ) -> StorageResult<Option<InstagramAccount>> {
        let span = tracing::debug_span!("database_query", query = "SELECT account by external id");

        let row = sqlx::query(
            r#"
            SELECT id, instagram_user_id, username, access_token, is_active, created_at
            FROM instagram_accounts
            WHERE instagram_user_id = $1
            "#,
        )
        .bind(instagram_user_id)
        .fetch_optional(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, instagram_user_id = %instagram_user_id, "Failed to resolve account");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(row.as_ref().map(account_from_row))
    }
}
