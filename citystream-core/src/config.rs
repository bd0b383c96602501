//! Startup configuration of the stream pipelines
use std::collections::HashMap;
use std::time::Duration;

use backon::ExponentialBuilder;
use bon::Builder;

/// Settings shared by all stream pipelines.
///
/// ```
/// use std::time::Duration;
/// use citystream::config::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .max_batch_size(500)
///     .max_batch_window(Duration::from_secs(30))
///     .topics([("vehicle_data".to_string(), "vehicles".to_string())].into())
///     .build();
/// assert_eq!(config.topic_for("vehicle_data"), "vehicles");
/// assert_eq!(config.topic_for("gps_data"), "gps_data");
/// ```
#[derive(Debug, Clone, Builder)]
pub struct PipelineConfig {
    /// Seal a batch once it holds this many records
    #[builder(default = 1000)]
    pub max_batch_size: usize,
    /// Seal a batch once this much time passed since its first record arrived
    #[builder(default = Duration::from_secs(60))]
    pub max_batch_window: Duration,
    /// Maximum time to wait for a message before re-checking the batch window
    #[builder(default = Duration::from_secs(1))]
    pub poll_timeout: Duration,
    /// Retry behaviour for broker and storage failures
    #[builder(default)]
    pub retry: RetryPolicy,
    /// Topic per stream name. Streams not listed read from the topic named like the stream.
    #[builder(default)]
    pub topics: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PipelineConfig {
    /// Topic the given stream is read from
    pub fn topic_for<'a>(&'a self, stream: &'a str) -> &'a str {
        self.topics.get(stream).map(String::as_str).unwrap_or(stream)
    }
}

/// Exponential backoff settings.
///
/// Broker failures are retried without limit, storage writes up to `storage_max_attempts`
/// attempts in total.
#[derive(Debug, Clone, Builder)]
pub struct RetryPolicy {
    #[builder(default = Duration::from_millis(100))]
    pub storage_min_delay: Duration,
    #[builder(default = Duration::from_secs(10))]
    pub storage_max_delay: Duration,
    #[builder(default = 5)]
    pub storage_max_attempts: usize,
    #[builder(default = Duration::from_millis(100))]
    pub broker_min_delay: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub broker_max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    pub(crate) fn storage_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.storage_min_delay)
            .with_max_delay(self.storage_max_delay)
            // max_times counts retries, not attempts
            .with_max_times(self.storage_max_attempts.saturating_sub(1))
    }

    pub(crate) fn broker_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.broker_min_delay)
            .with_max_delay(self.broker_max_delay)
            .with_max_times(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use backon::BackoffBuilder;

    use super::*;

    /// storage backoff yields one delay less than there are attempts
    #[test]
    fn storage_backoff_is_bounded() {
        let policy = RetryPolicy::builder().storage_max_attempts(4).build();
        assert_eq!(policy.storage_backoff().build().count(), 3);
    }

    /// broker backoff keeps going and is capped
    #[test]
    fn broker_backoff_is_unbounded() {
        let policy = RetryPolicy::builder()
            .broker_max_delay(Duration::from_secs(2))
            .build();
        let mut delays = policy.broker_backoff().build();
        let last = delays.by_ref().take(1000).last().unwrap();
        assert_eq!(last, Duration::from_secs(2));
        assert!(delays.next().is_some());
    }
}
