use std::collections::HashMap;
use std::time::Duration;

use bon::bon;
use citystream::types::Record;
use kafka_sink_builder::SetAtLeastOneBroker;
use rdkafka::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseProducer, DefaultProducerContext, Producer as _};
use thiserror::Error;
use tracing::{debug, trace};

use crate::KafkaRecord;

/// Interval at which a full send queue is drained before sending again
const QUEUE_FULL_POLL: Duration = Duration::from_millis(100);

/// Publishes telemetry records to Kafka.
///
/// Records are keyed by their device id, so all records of a device land on the same
/// partition. A full local send queue is waited out instead of failing the send.
pub struct KafkaSink {
    producer: BaseProducer<DefaultProducerContext>,
}

#[bon]
impl KafkaSink {
    /// Create a producer for the given brokers
    #[builder]
    #[builder(on(String, into))]
    pub fn new(
        #[builder(field)] kafka_config: HashMap<String, String>,
        #[builder(field)] brokers: Vec<String>,
        /// this is a workaround to check if at least one broker was provided
        #[builder(overwritable, setters(vis = "", name = "at_least_one_broker"))]
        _at_least_one_broker: (),
        /// Client id reported to the brokers
        #[builder(default = "citystream".to_owned())]
        client_id: String,
    ) -> Result<Self, KafkaProducerError> {
        let producer = producer_config(&kafka_config, &brokers, &client_id)
            .create()
            .map_err(KafkaProducerError::CreateProducer)?;
        Ok(Self { producer })
    }
}

fn producer_config(
    kafka_config: &HashMap<String, String>,
    brokers: &[String],
    client_id: &str,
) -> ClientConfig {
    let mut kafka_conf = ClientConfig::new();
    kafka_conf.set("acks", "all");
    for (k, v) in kafka_config.iter() {
        kafka_conf.set(k, v);
    }
    kafka_conf
        .set("client.id", client_id)
        .set("bootstrap.servers", brokers.join(","));
    kafka_conf
}

impl<S: kafka_sink_builder::State> KafkaSinkBuilder<S> {
    /// Provide an additional config for the Kafka producer, e.g. `acks` or `linger.ms`.
    /// `bootstrap.servers` and `client.id` are ignored, use the builder methods instead.
    pub fn conf(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kafka_config.insert(key.into(), value.into());
        self
    }
    /// Add a broker URL to produce records to
    pub fn broker(mut self, url: impl Into<String>) -> KafkaSinkBuilder<SetAtLeastOneBroker<S>> {
        self.brokers.push(url.into());
        self.at_least_one_broker(())
    }
}

impl KafkaSink {
    /// Encode `record` as JSON and queue it for `topic`, keyed by its device id
    pub fn publish(&self, topic: &str, record: &Record) -> Result<(), KafkaProducerError> {
        let kafka_record = KafkaRecord::builder()
            .topic(topic)
            .key(record.device_id().as_bytes().to_vec())
            .payload(record.to_json().map_err(KafkaProducerError::Encode)?)
            .build();
        self.send(&kafka_record)?;
        trace!("Queued {} for '{topic}'", record.id());
        Ok(())
    }

    /// Queue a raw record for sending
    pub fn send(&self, record: &KafkaRecord) -> Result<(), KafkaProducerError> {
        let mut pending = record.base_record();
        loop {
            match self.producer.send(pending) {
                Ok(()) => break,
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    debug!("Send queue is full, waiting for deliveries");
                    self.producer.poll(QUEUE_FULL_POLL);
                    pending = returned;
                }
                Err((e, _)) => return Err(KafkaProducerError::Send(e)),
            }
        }
        self.producer.poll(Duration::default());
        Ok(())
    }

    /// Number of records queued but not yet acknowledged by the brokers
    pub fn in_flight(&self) -> i32 {
        self.producer.in_flight_count()
    }

    /// Wait until all queued records were delivered
    pub fn flush(&self, timeout: Duration) -> Result<(), KafkaProducerError> {
        debug!("Flushing {} queued records", self.in_flight());
        self.producer
            .flush(timeout)
            .map_err(KafkaProducerError::Flush)
    }
}

/// Possible errors which can occur in the Kafka producer
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum KafkaProducerError {
    #[error("Failed to send message")]
    Send(#[source] KafkaError),
    #[error("Failed to create Kafka Producer")]
    CreateProducer(#[source] KafkaError),
    #[error("Failed to flush queued messages")]
    Flush(#[source] KafkaError),
    #[error("Failed to encode record")]
    Encode(#[source] serde_json::Error),
}

/// Doctests to assert some bad builders do not compile
/// see: https://stackoverflow.com/a/55327334
/// this should not compile because the broker is missing
/// ```compile_fail
/// use citystream_kafka::KafkaSink;
/// KafkaSink::builder()
/// .client_id("generator")
/// .build();
/// ```
struct _CompileTests;
