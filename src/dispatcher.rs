//! Outbound action dispatch with execution bookkeeping.
//!
//! The dispatcher brackets every platform call with an [`ActionExecution`]
//! record: a `pending` row before the call, then the timed outcome. Platform
//! rejections become `failed` rows for the retry sweep to pick up; only
//! bookkeeping failures surface as errors.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::errors::ProcessorError;
use crate::metrics::SharedMetricsPublisher;
use crate::platform::PlatformClient;
use crate::storage::{
    ActionExecution, ActionType, CommentEvent, ExecutionStatus, ExecutionStorage,
};

pub struct ActionDispatcher {
    client: Arc<dyn PlatformClient>,
    executions: Arc<dyn ExecutionStorage>,
    metrics: SharedMetricsPublisher,
}

impl ActionDispatcher {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        executions: Arc<dyn ExecutionStorage>,
        metrics: SharedMetricsPublisher,
    ) -> Self {
        Self {
            client,
            executions,
            metrics,
        }
    }

    /// Posts a public reply under the event's comment on behalf of a rule.
    pub async fn dispatch_reply(
        &self,
        access_token: &str,
        event: &CommentEvent,
        rule_id: i64,
        response_text: &str,
    ) -> Result<ActionExecution, ProcessorError> {
        self.dispatch(
            access_token,
            event,
            rule_id,
            ActionType::PublicReply,
            &event.comment_id,
            response_text,
        )
        .await
    }

    /// Sends a direct message to the event's commenter on behalf of a rule.
    pub async fn dispatch_direct_message(
        &self,
        access_token: &str,
        event: &CommentEvent,
        rule_id: i64,
        message_text: &str,
    ) -> Result<ActionExecution, ProcessorError> {
        self.dispatch(
            access_token,
            event,
            rule_id,
            ActionType::PrivateMessage,
            &event.commenter_id,
            message_text,
        )
        .await
    }

    async fn dispatch(
        &self,
        access_token: &str,
        event: &CommentEvent,
        rule_id: i64,
        action_type: ActionType,
        target_id: &str,
        text: &str,
    ) -> Result<ActionExecution, ProcessorError> {
        let mut execution = self
            .executions
            .create_pending(event.id, rule_id, action_type, text, Utc::now())
            .await
            .map_err(|source| ProcessorError::ExecutionPersistFailed { source })?;

        let started = Instant::now();
        let sent = match action_type {
            ActionType::PublicReply => self.client.post_reply(access_token, target_id, text).await,
            ActionType::PrivateMessage => {
                self.client
                    .send_direct_message(access_token, target_id, text)
                    .await
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let executed_at = Utc::now();
        let (status, error_message) = if sent {
            (ExecutionStatus::Success, None)
        } else {
            (
                ExecutionStatus::Failed,
                Some(format!("Platform rejected {action_type}")),
            )
        };

        self.executions
            .record_outcome(
                execution.id,
                status,
                error_message.as_deref(),
                elapsed_ms,
                executed_at,
            )
            .await
            .map_err(|source| ProcessorError::ExecutionPersistFailed { source })?;

        self.metrics
            .incr_with_tags(
                "dispatch.action",
                &[
                    ("action_type", action_type.as_str()),
                    ("status", status.as_str()),
                ],
            )
            .await;
        self.metrics
            .time_with_tags(
                "dispatch.duration_ms",
                elapsed_ms.max(0) as u64,
                &[("action_type", action_type.as_str())],
            )
            .await;

        if sent {
            info!(
                event_id = event.id,
                rule_id,
                action_type = %action_type,
                elapsed_ms,
                "Action dispatched"
            );
        } else {
            warn!(
                event_id = event.id,
                rule_id,
                action_type = %action_type,
                "Action rejected by platform, left for retry sweep"
            );
        }

        execution.status = status;
        execution.error_message = error_message;
        execution.execution_time_ms = Some(elapsed_ms);
        execution.executed_at = Some(executed_at);
        Ok(execution)
    }
}
