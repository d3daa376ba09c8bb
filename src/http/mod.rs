//! HTTP surface for the service.
//!
//! Three endpoints, all built with Axum:
//! - `GET /webhooks/instagram` - subscription verification handshake
//! - `POST /webhooks/instagram` - webhook delivery intake
//! - `GET /health` - liveness plus a database round-trip
//!
//! Delivery responses are always successful once the payload reaches the
//! ingestor; per-entry problems are reported in the response body counters so
//! the platform never redelivers a whole batch over one bad entry.

pub mod context;
pub mod handle_webhook;
pub mod server;

pub use context::{InnerWebContext, WebContext};
pub use server::build_router;
