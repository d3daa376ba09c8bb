//! Storage layer abstractions and PostgreSQL implementations.
//!
//! One trait per aggregate, all production implementations sharing a single
//! `PgPool`: accounts ([`account`]), automation rules ([`rule`]), comment
//! events ([`event`]), and action executions ([`execution`]).

pub mod account;
pub mod event;
pub mod execution;
pub mod rule;
pub mod traits;

pub use account::{AccountStorage, InstagramAccount, PostgresAccountStorage};
pub use event::{CommentEvent, EventStorage, NewCommentEvent, PersistOutcome, PostgresEventStorage};
pub use execution::{
    ActionExecution, ActionType, ExecutionStatus, ExecutionStorage, PostgresExecutionStorage,
};
pub use rule::{AutomationRule, PostgresRuleStorage, RuleStorage};
pub use traits::{Storage, StorageResult};

use async_trait::async_trait;
use sqlx::PgPool;

use crate::errors::StorageError;

/// Health check over the shared PostgreSQL pool.
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::ConnectionFailed { source: e })?;
        Ok(())
    }
}
