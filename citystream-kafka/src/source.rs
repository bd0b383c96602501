use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use citystream::reader::{BrokerError, MessageSource, MessageStream, RawMessage};
use citystream::types::Offset;
use kafka_source_builder::SetAtLeastOneBroker;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{Message as _, TopicPartitionList};
use thiserror::Error;
use tracing::{debug, warn};

type KafkaPartition = i32;

/// Reads citystream topics from Kafka.
///
/// Every subscription gets its own consumer which is assigned a single partition at an
/// explicit offset. Consumer group offsets are never committed, progress is tracked by
/// citystream's own checkpoints.
///
/// Custom [rdkafka configuration](https://github.com/confluentinc/librdkafka/blob/master/CONFIGURATION.md)
/// can be provided by calling `.conf(key, value)`.
///
/// ```
/// use citystream_kafka::KafkaSource;
///
/// let kafka_source = KafkaSource::builder()
///     .broker("broker:29092") // at least one broker must be provided
///     .broker("otherbroker:29092")
///     .group_id("citystream")
///     .conf("security.protocol", "ssl")
///     .build();
/// ```
#[derive(Builder, Debug)]
#[builder(on(String, into))]
pub struct KafkaSource {
    #[builder(field)]
    kafka_config: HashMap<String, String>,
    #[builder(field)]
    brokers: Vec<String>,
    /// this is a workaround to check if at least one broker was provided
    #[builder(overwritable, setters(vis = "", name = "at_least_one_broker"))]
    _at_least_one_broker: (),
    group_id: String,
    /// Partition read from every topic
    #[builder(default = 0)]
    partition: KafkaPartition,
    /// Timeout for fetching Kafka Broker metadata when subscribing
    #[builder(default = Duration::from_secs(10))]
    metadata_fetch_timeout: Duration,
}

impl<S: kafka_source_builder::State> KafkaSourceBuilder<S> {
    /// Provide an additional config for the Kafka consumer.
    /// Note that `bootstrap.servers`, `group.id` and `enable.auto.commit` configs are
    /// ignored. Use the respective builder methods to supply these
    pub fn conf(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kafka_config.insert(key.into(), value.into());
        self
    }
    /// Add a broker URL to consume from
    pub fn broker(mut self, url: impl Into<String>) -> KafkaSourceBuilder<SetAtLeastOneBroker<S>> {
        self.brokers.push(url.into());
        self.at_least_one_broker(())
    }
}

impl KafkaSource {
    fn client_config(&self) -> ClientConfig {
        let mut kafka_conf = ClientConfig::new();
        for (k, v) in self.kafka_config.iter() {
            kafka_conf.set(k, v);
        }
        kafka_conf
            .set("group.id", &self.group_id)
            .set("bootstrap.servers", self.brokers.join(","))
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest");
        kafka_conf
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn subscribe(
        &self,
        topic: &str,
        start_offset: Offset,
    ) -> Result<Box<dyn MessageStream>, BrokerError> {
        let kafka_offset =
            i64::try_from(start_offset).map_err(|_| KafkaConsumerError::OffsetRange(start_offset))?;
        let mut assignment = TopicPartitionList::with_capacity(1);
        assignment
            .add_partition_offset(topic, self.partition, rdkafka::Offset::Offset(kafka_offset))
            .map_err(KafkaConsumerError::TopicPartition)?;

        let config = self.client_config();
        let timeout = self.metadata_fetch_timeout;
        let owned_topic = topic.to_owned();
        let partition = self.partition;
        // metadata fetching blocks
        let (consumer, unread) = tokio::task::spawn_blocking(move || {
            let consumer: StreamConsumer = config
                .create()
                .map_err(KafkaConsumerError::CreateConsumer)?;
            let metadata = consumer
                .fetch_metadata(Some(&owned_topic), timeout)
                .map_err(KafkaConsumerError::FetchMetadata)?;
            let available: Vec<KafkaPartition> = metadata
                .topics()
                .iter()
                .filter(|t| t.name() == owned_topic)
                .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                .collect();
            let unread = unread_partitions(&owned_topic, partition, &available)?;
            consumer
                .assign(&assignment)
                .map_err(KafkaConsumerError::TopicPartition)?;
            Ok::<_, KafkaConsumerError>((consumer, unread))
        })
        .await
        .map_err(|e| BrokerError::Unavailable(Box::new(e)))??;
        if !unread.is_empty() {
            warn!(
                "Topic '{topic}' has partitions {unread:?} besides partition {partition}, \
                 messages in them are NOT ingested"
            );
        }

        debug!(
            "Assigned '{topic}' partition {} at offset {start_offset}",
            self.partition
        );
        Ok(Box::new(KafkaStream {
            consumer,
            topic: topic.to_owned(),
        }))
    }
}

/// Partitions of `topic` other than `assigned`. Fails if `assigned` does not exist.
///
/// Checkpoints hold a single offset per stream, so only one partition per topic is read.
fn unread_partitions(
    topic: &str,
    assigned: KafkaPartition,
    available: &[KafkaPartition],
) -> Result<Vec<KafkaPartition>, KafkaConsumerError> {
    if !available.contains(&assigned) {
        return Err(KafkaConsumerError::MissingPartition(
            topic.to_owned(),
            assigned,
        ));
    }
    Ok(available
        .iter()
        .copied()
        .filter(|p| *p != assigned)
        .collect())
}

/// A single assigned topic-partition.
/// This type can not be constructed directly, use [KafkaSource] instead.
pub struct KafkaStream {
    consumer: StreamConsumer,
    topic: String,
}

#[async_trait]
impl MessageStream for KafkaStream {
    async fn next_message(&mut self) -> Result<Option<RawMessage>, BrokerError> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(KafkaConsumerError::Poll)?;
        let offset = Offset::try_from(msg.offset())
            .map_err(|_| KafkaConsumerError::NegativeOffset(self.topic.clone(), msg.offset()))?;
        // an empty payload is passed on and rejected by the decoder
        let payload = msg.payload().map(<[u8]>::to_vec).unwrap_or_default();
        Ok(Some(RawMessage { offset, payload }))
    }
}

/// Possible errors which can occur in the Kafka consumer
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum KafkaConsumerError {
    #[error("Error polling Kafka consumer")]
    Poll(#[source] rdkafka::error::KafkaError),
    #[error("Failed to create Kafka consumer")]
    CreateConsumer(#[source] rdkafka::error::KafkaError),
    #[error("Could not assign topic-partition to consumer")]
    TopicPartition(#[source] rdkafka::error::KafkaError),
    #[error("Failed to fetch metadata from Kafka broker")]
    FetchMetadata(#[source] rdkafka::error::KafkaError),
    #[error("Offset {0} exceeds the Kafka offset range")]
    OffsetRange(Offset),
    #[error("Topic '{0}' has no partition {1}")]
    MissingPartition(String, KafkaPartition),
    #[error("Kafka returned negative offset {1} on topic '{0}'")]
    NegativeOffset(String, i64),
}

impl From<KafkaConsumerError> for BrokerError {
    fn from(value: KafkaConsumerError) -> Self {
        BrokerError::Unavailable(Box::new(value))
    }
}

/// Doctests to assert some bad builders do not compile
/// see: https://stackoverflow.com/a/55327334
/// this should not compile because the broker is missing
/// ```compile_fail
/// use citystream_kafka::KafkaSource;
/// KafkaSource::builder()
/// .group_id("groupid")
/// .build();
/// ```
/// missing group id
/// ```compile_fail
/// use citystream_kafka::KafkaSource;
/// KafkaSource::builder()
/// .broker("broker.com")
/// .build();
/// ```
struct _CompileTests;
