//! Background tasks.
//!
//! Each task owns its loop, supports graceful shutdown via a
//! `CancellationToken`, and reports through tracing and the shared metrics
//! publisher. The only task this service runs is the retry sweep.

pub mod retry;

pub use retry::{RetrySweepConfig, RetrySweeper};
