use async_trait::async_trait;
use cadence::{BufferedUdpMetricSink, Counted, CountedExt, QueuingMetricSink, StatsdClient, Timed};
use std::net::UdpSocket;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Trait for publishing counters and timings, cadence-compatible.
#[async_trait]
pub trait MetricsPublisher: Send + Sync {
    /// Increment a counter by 1
    async fn incr(&self, key: &str);

    /// Increment a counter by a specific value
    async fn count(&self, key: &str, value: u64);

    /// Increment a counter with tags
    async fn incr_with_tags(&self, key: &str, tags: &[(&str, &str)]);

    /// Record a timing in milliseconds
    async fn time(&self, key: &str, millis: u64);

    /// Record a timing with tags
    async fn time_with_tags(&self, key: &str, millis: u64, tags: &[(&str, &str)]);
}

/// No-op implementation for development and testing
#[derive(Debug, Clone, Default)]
pub struct NoOpMetricsPublisher;

impl NoOpMetricsPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricsPublisher for NoOpMetricsPublisher {
    async fn incr(&self, _key: &str) {}
    async fn count(&self, _key: &str, _value: u64) {}
    async fn incr_with_tags(&self, _key: &str, _tags: &[(&str, &str)]) {}
    async fn time(&self, _key: &str, _millis: u64) {}
    async fn time_with_tags(&self, _key: &str, _millis: u64, _tags: &[(&str, &str)]) {}
}

/// Statsd-backed metrics publisher using cadence
pub struct StatsdMetricsPublisher {
    client: StatsdClient,
}

impl StatsdMetricsPublisher {
    pub fn new(host: &str, prefix: &str) -> Result<Self, Box<dyn std::error::Error>> {
        Self::new_with_bind(host, prefix, "[::]:0")
    }

    pub fn new_with_bind(
        host: &str,
        prefix: &str,
        bind_addr: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        let buffered_sink = BufferedUdpMetricSink::from(host, socket)?;
        let queuing_sink = QueuingMetricSink::builder()
            .with_error_handler(move |error| {
                error!("Failed to send metric via sink: {}", error);
            })
            .build(buffered_sink);
        let client = StatsdClient::from_sink(prefix, queuing_sink);

        debug!(host, prefix, bind_addr, "StatsdMetricsPublisher created");
        Ok(Self { client })
    }
}

#[async_trait]
impl MetricsPublisher for StatsdMetricsPublisher {
    async fn incr(&self, key: &str) {
        if let Err(e) = self.client.incr(key) {
            error!("Failed to send metric {}: {}", key, e);
        }
    }

    async fn count(&self, key: &str, value: u64) {
        let _ = self.client.count(key, value);
    }

    async fn incr_with_tags(&self, key: &str, tags: &[(&str, &str)]) {
        let mut builder = self.client.incr_with_tags(key);
        for (k, v) in tags {
            builder = builder.with_tag(k, v);
        }
        let _ = builder.send();
    }

    async fn time(&self, key: &str, millis: u64) {
        let _ = self.client.time(key, millis);
    }

    async fn time_with_tags(&self, key: &str, millis: u64, tags: &[(&str, &str)]) {
        let mut builder = self.client.time_with_tags(key, millis);
        for (k, v) in tags {
            builder = builder.with_tag(k, v);
        }
        let _ = builder.send();
    }
}

/// Type alias for shared metrics publisher
pub type SharedMetricsPublisher = Arc<dyn MetricsPublisher>;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("error-replygram-metrics-1 Failed to create metrics publisher: {0}")]
    CreationFailed(String),

    #[error("error-replygram-metrics-2 Invalid metrics configuration: {0}")]
    InvalidConfig(String),
}

/// Create a metrics publisher based on the `METRICS_ADAPTER` setting:
/// `noop` (or unset) for a no-op publisher, `statsd` for cadence.
pub fn create_metrics_publisher(
    metrics_adapter: &str,
    metrics_statsd_host: Option<&str>,
    metrics_prefix: &str,
) -> Result<SharedMetricsPublisher, MetricsError> {
    match metrics_adapter {
        "noop" | "" => Ok(Arc::new(NoOpMetricsPublisher::new())),
        "statsd" => {
            let host = metrics_statsd_host.ok_or_else(|| {
                MetricsError::InvalidConfig(
                    "METRICS_STATSD_HOST is required when using statsd adapter".to_string(),
                )
            })?;

            let publisher = StatsdMetricsPublisher::new(host, metrics_prefix)
                .map_err(|e| MetricsError::CreationFailed(e.to_string()))?;

            Ok(Arc::new(publisher))
        }
        _ => Err(MetricsError::InvalidConfig(format!(
            "Unknown metrics adapter: {}",
            metrics_adapter
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_metrics() {
        let metrics = NoOpMetricsPublisher::new();

        metrics.incr("test.counter").await;
        metrics.count("test.counter", 5).await;
        metrics
            .incr_with_tags("test.counter", &[("env", "test")])
            .await;
        metrics.time("test.timing", 42).await;
    }

    #[test]
    fn test_create_noop_publisher() {
        let result = create_metrics_publisher("noop", None, "replygram");
        assert!(result.is_ok());
    }

    #[test]
    fn test_missing_statsd_host() {
        let result = create_metrics_publisher("statsd", None, "replygram");
        assert!(matches!(result, Err(MetricsError::InvalidConfig(_))));
    }
}
