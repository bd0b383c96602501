//! Kafka connectivity for citystream: a [MessageSource](citystream::reader::MessageSource)
//! reading one partition per topic, and a producer publishing telemetry records.
mod record;
mod sink;
mod source;

pub use record::KafkaRecord;
pub use sink::{KafkaProducerError, KafkaSink};
pub use source::{KafkaConsumerError, KafkaSource, KafkaStream};
