//! Webhook ingress: payload decoding, verification, and event intake.
//!
//! The platform delivers notifications in two historical shapes (entries with
//! a nested `changes` array, and flat `field`/`value` entries) and may batch
//! several notifications into one request as a JSON array. Ingress flattens
//! all of them to (account, comment) pairs, persists each comment exactly
//! once, and hands newly created events to the rule processor.
//!
//! Per-entry problems are logged and counted but never surfaced: the webhook
//! response stays successful so the platform does not redeliver the whole
//! batch. Only a storage failure aborts the request.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::constants::{WEBHOOK_FIELD_COMMENTS, WEBHOOK_MODE_SUBSCRIBE};
use crate::errors::IngressError;
use crate::metrics::SharedMetricsPublisher;
use crate::processor::RuleProcessor;
use crate::storage::{AccountStorage, EventStorage, NewCommentEvent, PersistOutcome};

/// One webhook notification: the subscribed object plus affected entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotification {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

/// One affected account within a notification.
///
/// Older deliveries carry a flat `field`/`value` pair, newer ones a nested
/// `changes` array. Both are accepted and treated identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEntry {
    /// The account's platform-assigned external id.
    pub id: String,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookChange {
    pub field: String,
    #[serde(default)]
    pub value: Option<Value>,
}

/// The comment body carried by a `comments` change.
#[derive(Debug, Clone, Deserialize)]
pub struct CommentPayload {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from: Option<CommentAuthor>,
    #[serde(default)]
    pub media: Option<MediaRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentAuthor {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

/// Counters for one delivery, echoed in the webhook response body.
#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub notifications: usize,
    pub comments_seen: usize,
    pub events_created: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failures: usize,
    pub rules_fired: usize,
}

/// Answer a subscription verification handshake.
///
/// Echoes the challenge iff the mode is `subscribe` and the token matches the
/// configured secret.
pub fn verify(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    expected_token: &str,
) -> Option<String> {
    match (mode, token, challenge) {
        (Some(mode), Some(token), Some(challenge))
            if mode == WEBHOOK_MODE_SUBSCRIBE && token == expected_token =>
        {
            Some(challenge.to_string())
        }
        _ => None,
    }
}

pub struct Ingestor {
    accounts: Arc<dyn AccountStorage>,
    events: Arc<dyn EventStorage>,
    processor: Arc<RuleProcessor>,
    metrics: SharedMetricsPublisher,
}

impl Ingestor {
    pub fn new(
        accounts: Arc<dyn AccountStorage>,
        events: Arc<dyn EventStorage>,
        processor: Arc<RuleProcessor>,
        metrics: SharedMetricsPublisher,
    ) -> Self {
        Self {
            accounts,
            events,
            processor,
            metrics,
        }
    }

    /// Ingest one webhook delivery, which may be a single notification or an
    /// array of them.
    pub async fn receive(&self, payload: Value) -> Result<IngestReport, IngressError> {
        let notifications: Vec<WebhookNotification> = if payload.is_array() {
            serde_json::from_value(payload)
        } else {
            serde_json::from_value(payload).map(|n| vec![n])
        }
        .map_err(|e| IngressError::MalformedPayload {
            details: e.to_string(),
        })?;

        let mut report = IngestReport {
            notifications: notifications.len(),
            ..IngestReport::default()
        };

        for notification in &notifications {
            for entry in &notification.entry {
                self.ingest_entry(entry, &mut report).await?;
            }
        }

        self.metrics.incr("ingress.deliveries").await;
        self.metrics
            .count("ingress.events_created", report.events_created as u64)
            .await;

        info!(
            notifications = report.notifications,
            events_created = report.events_created,
            duplicates = report.duplicates,
            skipped = report.skipped,
            failures = report.failures,
            "Webhook delivery ingested"
        );

        Ok(report)
    }

    async fn ingest_entry(
        &self,
        entry: &WebhookEntry,
        report: &mut IngestReport,
    ) -> Result<(), IngressError> {
        // Flat field/value entries are the older delivery shape; fold them in
        // alongside the nested changes.
        let mut changes: Vec<WebhookChange> = entry.changes.clone();
        if let Some(field) = &entry.field {
            changes.push(WebhookChange {
                field: field.clone(),
                value: entry.value.clone(),
            });
        }

        for change in &changes {
            if change.field != WEBHOOK_FIELD_COMMENTS {
                debug!(field = %change.field, "Ignoring non-comment change");
                continue;
            }
            report.comments_seen += 1;
            self.ingest_comment(entry, change.value.as_ref(), report)
                .await?;
        }

        Ok(())
    }

    async fn ingest_comment(
        &self,
        entry: &WebhookEntry,
        value: Option<&Value>,
        report: &mut IngestReport,
    ) -> Result<(), IngressError> {
        let comment: CommentPayload = match value {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(comment) => comment,
                Err(e) => {
                    warn!(account = %entry.id, error = %e, "Undecodable comment payload");
                    report.failures += 1;
                    return Ok(());
                }
            },
            None => {
                warn!(account = %entry.id, "Comment change without a value");
                report.failures += 1;
                return Ok(());
            }
        };

        let Some(author) = &comment.from else {
            warn!(comment_id = %comment.id, "Comment without an author, skipping");
            report.failures += 1;
            return Ok(());
        };

        let account = self
            .accounts
            .find_by_instagram_user_id(&entry.id)
            .await
            .map_err(|source| IngressError::PersistenceFailed { source })?;

        let Some(account) = account else {
            debug!(external_id = %entry.id, "No linked account for entry, dropping");
            report.skipped += 1;
            return Ok(());
        };

        if !account.is_active || account.access_token.is_none() {
            debug!(account_id = account.id, "Account inactive or unlinked, dropping");
            report.skipped += 1;
            return Ok(());
        }

        let comment_timestamp = entry
            .time
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
            .unwrap_or_else(Utc::now);

        let new_event = NewCommentEvent {
            instagram_account_id: account.id,
            comment_id: comment.id.clone(),
            media_id: comment
                .media
                .as_ref()
                .and_then(|m| m.id.clone())
                .unwrap_or_default(),
            commenter_id: author.id.clone(),
            commenter_username: author.username.clone(),
            comment_text: comment.text.clone().unwrap_or_default(),
            comment_timestamp,
            media_type: comment.media.as_ref().and_then(|m| m.media_type.clone()),
            webhook_data: serde_json::to_value(entry).ok(),
        };

        let outcome = self
            .events
            .persist(&new_event)
            .await
            .map_err(|source| IngressError::PersistenceFailed { source })?;

        let event = match outcome {
            PersistOutcome::Created(event) => {
                report.events_created += 1;
                event
            }
            PersistOutcome::Duplicate(_) => {
                debug!(comment_id = %comment.id, "Duplicate delivery, already stored");
                self.metrics.incr("ingress.duplicates").await;
                report.duplicates += 1;
                return Ok(());
            }
        };

        match self.processor.process(&account, &event).await {
            Ok(process_report) => {
                report.rules_fired += process_report.fired_rule_ids.len();
            }
            Err(e) => {
                // Evaluation failures stay local to the entry; the event is
                // stored and the sweep or a manual replay can pick it up.
                error!(event_id = event.id, error = %e, "Rule evaluation failed");
                report.failures += 1;
            }
        }

        Ok(())
    }
}
