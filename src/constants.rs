//! Application-wide constants

/// Webhook change field that carries comment notifications. Entries with any
/// other field are ignored without error.
pub(crate) const WEBHOOK_FIELD_COMMENTS: &str = "comments";

/// Handshake mode the platform sends when verifying a webhook subscription.
pub(crate) const WEBHOOK_MODE_SUBSCRIBE: &str = "subscribe";

/// Similarity floor used by fuzzy matching when a rule has no threshold set.
pub(crate) const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;
