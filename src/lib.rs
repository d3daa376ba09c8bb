//! # replygram
//!
//! replygram is a comment automation engine for Instagram business accounts.
//! It ingests comment webhooks from the Graph API, matches each comment
//! against user-authored automation rules, and dispatches public replies and
//! direct messages, recording every action for audit and retry.
//!
//! ## Architecture Overview
//!
//! - **Ingress** ([`ingress`]): decodes webhook deliveries (single or
//!   batched, nested or flat entry shapes), verifies the subscription
//!   handshake, and persists each comment exactly once.
//! - **Event store** ([`storage::event`]): the idempotency boundary, keyed by
//!   the platform comment id.
//! - **Processor** ([`processor`]): evaluates active rules in priority order
//!   with per-account serialization, commits processed flags and rule
//!   counters transactionally.
//! - **Matcher** ([`matcher`]): exact/partial/regex/fuzzy keyword matching.
//! - **Throttle** ([`throttle`]): per-rule hourly and daily rate ceilings.
//! - **Dispatcher** ([`dispatcher`]): brackets Graph API calls with
//!   `ActionExecution` records.
//! - **Retry sweep** ([`tasks::retry`]): background exponential-backoff
//!   retries of failed actions.
//!
//! ## Configuration
//!
//! The service is configured via environment variables. Key variables include:
//! - `DATABASE_URL`: PostgreSQL connection string
//! - `WEBHOOK_VERIFY_TOKEN`: shared secret for the subscription handshake
//! - `GRAPH_API_BASE_URL` / `GRAPH_API_VERSION`: outbound API target
//! - `RETRY_MAX_ATTEMPTS` / `RETRY_BASE_DELAY_MS`: retry policy
//!
//! ## Error Handling
//!
//! All error strings use the format: `error-replygram-<domain>-<number> <message>`

pub mod config;
pub(crate) mod constants;
pub mod dispatcher;
pub mod errors;
pub mod http;
pub mod ingress;
pub mod matcher;
pub mod metrics;
pub mod platform;
pub mod processor;
pub mod storage;
pub mod tasks;
pub mod throttle;

#[cfg(test)]
pub mod test_helpers;
