//! Storage layer trait definitions and common types.
//!
//! Defines the result alias and the health-check interface shared by every
//! storage implementation. Each aggregate (accounts, rules, events,
//! executions) gets its own trait in a sibling module, all backed by the same
//! PostgreSQL pool in production.

use crate::errors::StorageError;
use async_trait::async_trait;

/// Result type alias for storage operations.
///
/// All storage operations return this type for consistent error handling.
pub type StorageResult<T> = Result<T, StorageError>;

/// Core storage trait for health monitoring.
///
/// Implementations must be `Send + Sync` so they can be shared across async
/// tasks and called concurrently.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Performs a lightweight health check on the storage backend.
    ///
    /// For database implementations a simple `SELECT 1` query is sufficient.
    async fn health_check(&self) -> StorageResult<()>;
}
