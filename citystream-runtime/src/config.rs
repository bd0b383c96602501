//! Configuration of the binaries, read from environment variables
use std::collections::HashMap;
use std::time::Duration;

use citystream::config::{PipelineConfig, RetryPolicy};
use citystream::schema::{SchemaRegistry, StreamKind, UnknownStreamError};
use envconfig::Envconfig;

/// Kafka connection settings
#[derive(Envconfig, Debug)]
pub struct KafkaConfig {
    /// Comma separated list of brokers
    #[envconfig(from = "KAFKA_BOOTSTRAP_SERVERS", default = "localhost:9092")]
    pub bootstrap_servers: String,
    /// Partition read from every topic
    #[envconfig(from = "CITYSTREAM_KAFKA_PARTITION", default = "0")]
    pub partition: i32,
}

/// Topic of every record kind
#[allow(missing_docs)]
#[derive(Envconfig, Debug)]
pub struct TopicConfig {
    #[envconfig(from = "VEHICLE_TOPIC", default = "vehicle_data")]
    pub vehicle: String,
    #[envconfig(from = "GPS_TOPIC", default = "gps_data")]
    pub gps: String,
    #[envconfig(from = "TRAFFIC_TOPIC", default = "traffic_data")]
    pub traffic: String,
    #[envconfig(from = "WEATHER_TOPIC", default = "weather_data")]
    pub weather: String,
    #[envconfig(from = "EMERGENCY_TOPIC", default = "emergency_data")]
    pub emergency: String,
}

impl TopicConfig {
    /// Topic records of `kind` are published to and read from
    pub fn topic_for(&self, kind: StreamKind) -> &str {
        match kind {
            StreamKind::Vehicle => &self.vehicle,
            StreamKind::Gps => &self.gps,
            StreamKind::TrafficCamera => &self.traffic,
            StreamKind::Weather => &self.weather,
            StreamKind::EmergencyIncident => &self.emergency,
        }
    }

    /// Topic per stream name
    pub fn by_stream(&self) -> HashMap<String, String> {
        StreamKind::ALL
            .into_iter()
            .map(|k| (k.stream_name().to_owned(), self.topic_for(k).to_owned()))
            .collect()
    }
}

/// Per-stream allowed lateness, falling back to the global setting if unset
#[allow(missing_docs)]
#[derive(Envconfig, Debug)]
pub struct LatenessOverrides {
    #[envconfig(from = "VEHICLE_ALLOWED_LATENESS_SECS")]
    pub vehicle: Option<u64>,
    #[envconfig(from = "GPS_ALLOWED_LATENESS_SECS")]
    pub gps: Option<u64>,
    #[envconfig(from = "TRAFFIC_ALLOWED_LATENESS_SECS")]
    pub traffic: Option<u64>,
    #[envconfig(from = "WEATHER_ALLOWED_LATENESS_SECS")]
    pub weather: Option<u64>,
    #[envconfig(from = "EMERGENCY_ALLOWED_LATENESS_SECS")]
    pub emergency: Option<u64>,
}

impl LatenessOverrides {
    fn for_kind(&self, kind: StreamKind) -> Option<u64> {
        match kind {
            StreamKind::Vehicle => self.vehicle,
            StreamKind::Gps => self.gps,
            StreamKind::TrafficCamera => self.traffic,
            StreamKind::Weather => self.weather,
            StreamKind::EmergencyIncident => self.emergency,
        }
    }
}

/// Settings of the ingestion service
#[allow(missing_docs)]
#[derive(Envconfig, Debug)]
pub struct IngestConfig {
    #[envconfig(nested)]
    pub kafka: KafkaConfig,
    #[envconfig(nested)]
    pub topics: TopicConfig,
    /// Kafka consumer group id
    #[envconfig(from = "CITYSTREAM_GROUP_ID", default = "citystream")]
    pub group_id: String,
    /// URL of the storage root, `file://`, `s3://` or `memory://`
    #[envconfig(from = "CITYSTREAM_STORAGE_ROOT", default = "file:///tmp/citystream")]
    pub storage_root: String,
    #[envconfig(from = "CITYSTREAM_ALLOWED_LATENESS_SECS", default = "120")]
    pub allowed_lateness_secs: u64,
    #[envconfig(nested)]
    pub lateness: LatenessOverrides,
    #[envconfig(from = "CITYSTREAM_MAX_BATCH_SIZE", default = "1000")]
    pub max_batch_size: usize,
    #[envconfig(from = "CITYSTREAM_MAX_BATCH_WINDOW_SECS", default = "60")]
    pub max_batch_window_secs: u64,
    #[envconfig(from = "CITYSTREAM_POLL_TIMEOUT_MS", default = "1000")]
    pub poll_timeout_ms: u64,
    #[envconfig(from = "CITYSTREAM_STORAGE_MAX_ATTEMPTS", default = "5")]
    pub storage_max_attempts: usize,
}

impl IngestConfig {
    /// Pipeline settings derived from this config
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::builder()
            .max_batch_size(self.max_batch_size)
            .max_batch_window(Duration::from_secs(self.max_batch_window_secs))
            .poll_timeout(Duration::from_millis(self.poll_timeout_ms))
            .retry(
                RetryPolicy::builder()
                    .storage_max_attempts(self.storage_max_attempts)
                    .build(),
            )
            .topics(self.topics.by_stream())
            .build()
    }

    /// All stream definitions with their configured allowed lateness
    pub fn schema_registry(&self) -> Result<SchemaRegistry, UnknownStreamError> {
        StreamKind::ALL
            .into_iter()
            .try_fold(SchemaRegistry::new(), |registry, kind| {
                let secs = self
                    .lateness
                    .for_kind(kind)
                    .unwrap_or(self.allowed_lateness_secs);
                registry.with_allowed_lateness(kind.stream_name(), Duration::from_secs(secs))
            })
    }
}

/// Settings of the telemetry generator
#[allow(missing_docs)]
#[derive(Envconfig, Debug)]
pub struct GeneratorConfig {
    #[envconfig(nested)]
    pub kafka: KafkaConfig,
    #[envconfig(nested)]
    pub topics: TopicConfig,
    /// Device id put on every record
    #[envconfig(from = "GENERATOR_DEVICE_ID", default = "Vehicle-citystream-123")]
    pub device_id: String,
    /// Wall clock time between ticks
    #[envconfig(from = "GENERATOR_INTERVAL_MS", default = "5000")]
    pub interval_ms: u64,
    #[envconfig(from = "GENERATOR_SEED", default = "42")]
    pub seed: u64,
    /// Stop after this many ticks, even if the journey is not over
    #[envconfig(from = "GENERATOR_MAX_TICKS")]
    pub max_ticks: Option<u64>,
}

impl GeneratorConfig {
    /// Time between ticks
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
