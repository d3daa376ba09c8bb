//! Background task that retries failed outbound actions.
//!
//! Dispatch never retries inline; a platform rejection leaves a `failed`
//! execution row behind. This sweep polls for rows whose next attempt is due,
//! re-invokes the platform client, and either records success or schedules
//! the next attempt with exponential backoff. A row whose attempt budget is
//! exhausted is marked terminally `failed`.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::SweepError;
use crate::metrics::SharedMetricsPublisher;
use crate::platform::PlatformClient;
use crate::storage::{
    AccountStorage, ActionExecution, ActionType, EventStorage, ExecutionStatus, ExecutionStorage,
};

/// Tuning for the retry sweep loop.
#[derive(Debug, Clone)]
pub struct RetrySweepConfig {
    /// How often the sweep polls for due executions.
    pub interval: Duration,
    /// Total attempt budget per execution, the initial dispatch included.
    pub max_retries: i32,
    /// First backoff delay; doubles per attempt.
    pub base_delay_ms: u64,
    /// Upper bound on candidates per sweep.
    pub batch_size: i64,
}

impl Default for RetrySweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_retries: 3,
            base_delay_ms: 1000,
            batch_size: 50,
        }
    }
}

/// Background task that drives failed executions through their retry budget.
pub struct RetrySweeper {
    executions: Arc<dyn ExecutionStorage>,
    events: Arc<dyn EventStorage>,
    accounts: Arc<dyn AccountStorage>,
    client: Arc<dyn PlatformClient>,
    metrics: SharedMetricsPublisher,
    config: RetrySweepConfig,
    cancel_token: CancellationToken,
}

impl RetrySweeper {
    pub fn new(
        executions: Arc<dyn ExecutionStorage>,
        events: Arc<dyn EventStorage>,
        accounts: Arc<dyn AccountStorage>,
        client: Arc<dyn PlatformClient>,
        metrics: SharedMetricsPublisher,
        config: RetrySweepConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            executions,
            events,
            accounts,
            client,
            metrics,
            config,
            cancel_token,
        }
    }

    pub async fn run(self) -> Result<(), SweepError> {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_retries = self.config.max_retries,
            "Retry sweeper started"
        );

        while !self.cancel_token.is_cancelled() {
            tokio::select! {
                () = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Retry sweep failed");
                    }
                }
                () = self.cancel_token.cancelled() => {
                    info!("Retry sweeper shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One sweep over the due executions. Returns how many were attempted.
    pub async fn sweep_once(&self) -> Result<usize, SweepError> {
        let now = Utc::now();
        let candidates = self
            .executions
            .due_for_retry(now, self.config.max_retries, self.config.batch_size)
            .await
            .map_err(|source| SweepError::CandidateQueryFailed { source })?;

        if candidates.is_empty() {
            return Ok(0);
        }

        debug!(candidates = candidates.len(), "Retrying due executions");
        let attempted = candidates.len();

        for execution in candidates {
            self.retry_execution(execution).await?;
        }

        self.metrics.count("sweep.attempted", attempted as u64).await;
        Ok(attempted)
    }

    async fn retry_execution(&self, execution: ActionExecution) -> Result<(), SweepError> {
        let context = match self.resolve_context(&execution).await? {
            Some(context) => context,
            None => {
                // The account was unlinked or the event vanished; the action
                // can never succeed, close it out with its budget spent so it
                // never re-qualifies as a candidate.
                self.executions
                    .mark_terminal(
                        execution.id,
                        self.config.max_retries.max(execution.retry_count),
                        "Account or event no longer available",
                        0,
                        Utc::now(),
                    )
                    .await
                    .map_err(|source| SweepError::BookkeepingFailed {
                        execution_id: execution.id,
                        source,
                    })?;
                return Ok(());
            }
        };

        let text = execution.response_text.as_deref().unwrap_or_default();
        let started = Instant::now();
        let sent = match execution.action_type {
            ActionType::PublicReply => {
                self.client
                    .post_reply(&context.access_token, &context.target_id, text)
                    .await
            }
            ActionType::PrivateMessage => {
                self.client
                    .send_direct_message(&context.access_token, &context.target_id, text)
                    .await
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as i64;
        let now = Utc::now();

        if sent {
            self.executions
                .record_outcome(execution.id, ExecutionStatus::Success, None, elapsed_ms, now)
                .await
                .map_err(|source| SweepError::BookkeepingFailed {
                    execution_id: execution.id,
                    source,
                })?;
            self.metrics.incr("sweep.retry_succeeded").await;
            info!(
                execution_id = execution.id,
                attempt = execution.retry_count + 1,
                "Retried action succeeded"
            );
            return Ok(());
        }

        let next_count = execution.retry_count + 1;
        if next_count >= self.config.max_retries {
            // The exhausted count must land in storage, or the row would
            // still satisfy the candidate predicate on the next sweep.
            self.executions
                .mark_terminal(
                    execution.id,
                    next_count,
                    "Retry budget exhausted",
                    elapsed_ms,
                    now,
                )
                .await
                .map_err(|source| SweepError::BookkeepingFailed {
                    execution_id: execution.id,
                    source,
                })?;
            self.metrics.incr("sweep.retry_exhausted").await;
            warn!(execution_id = execution.id, attempts = next_count, "Retry budget exhausted");
            return Ok(());
        }

        let delay_ms = self.config.base_delay_ms * 2u64.pow(execution.retry_count.max(0) as u32);
        let next_retry_at = now + ChronoDuration::milliseconds(delay_ms as i64);
        self.executions
            .schedule_retry(execution.id, next_count, next_retry_at)
            .await
            .map_err(|source| SweepError::BookkeepingFailed {
                execution_id: execution.id,
                source,
            })?;
        self.metrics.incr("sweep.retry_scheduled").await;
        debug!(
            execution_id = execution.id,
            retry_count = next_count,
            delay_ms,
            "Retry scheduled"
        );

        Ok(())
    }

    async fn resolve_context(
        &self,
        execution: &ActionExecution,
    ) -> Result<Option<RetryContext>, SweepError> {
        let event = self
            .events
            .get_event(execution.comment_event_id)
            .await
            .map_err(|source| SweepError::BookkeepingFailed {
                execution_id: execution.id,
                source,
            })?;

        let Some(event) = event else {
            return Ok(None);
        };

        let account = self
            .accounts
            .get_account(event.instagram_account_id)
            .await
            .map_err(|source| SweepError::BookkeepingFailed {
                execution_id: execution.id,
                source,
            })?;

        let Some(account) = account.filter(|a| a.is_active) else {
            return Ok(None);
        };
        let Some(access_token) = account.access_token else {
            return Ok(None);
        };

        let target_id = match execution.action_type {
            ActionType::PublicReply => event.comment_id,
            ActionType::PrivateMessage => event.commenter_id,
        };

        Ok(Some(RetryContext {
            access_token,
            target_id,
        }))
    }
}

struct RetryContext {
    access_token: String,
    target_id: String,
}
