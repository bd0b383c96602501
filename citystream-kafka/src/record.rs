use bon::Builder;
use rdkafka::producer::BaseRecord;

/// A single record to be sent to Kafka
#[derive(Builder, Debug, Clone)]
#[builder(on(String, into))]
pub struct KafkaRecord {
    /// Destination topic
    pub topic: String,
    /// Destination partition, chosen by the partitioner if `None`
    pub partition: Option<i32>,
    /// Message payload
    pub payload: Vec<u8>,
    /// Message key, e.g. the id of the producing device
    pub key: Option<Vec<u8>>,
}

impl KafkaRecord {
    pub(crate) fn base_record(&self) -> BaseRecord<'_, Vec<u8>, Vec<u8>> {
        let mut base_record = BaseRecord::<Vec<u8>, Vec<u8>, ()>::to(&self.topic);
        base_record.partition = self.partition;
        base_record.payload = Some(&self.payload);
        base_record.key = self.key.as_ref();
        base_record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_record_borrows_fields() {
        let record = KafkaRecord::builder()
            .topic("gps_data")
            .payload(b"{}".to_vec())
            .key(b"device-1".to_vec())
            .build();
        let base = record.base_record();
        assert_eq!(base.topic, "gps_data");
        assert_eq!(base.partition, None);
        assert_eq!(base.payload, Some(&b"{}".to_vec()));
        assert_eq!(base.key, Some(&b"device-1".to_vec()));
    }
}
