//! In-memory stand-ins for the broker, storage and checkpoint store
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeDelta, TimeZone, Utc};
use object_store::path::Path;

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::config::{PipelineConfig, RetryPolicy};
use crate::reader::{BrokerError, MessageSource, MessageStream, RawMessage};
use crate::schema::StreamKind;
use crate::storage::{DurableStorage, StorageError};
use crate::types::{
    EmergencyIncidentData, Envelope, EventTime, GpsData, Location, Offset, Payload, Record,
    TrafficCameraData, VehicleData, WeatherData,
};

/// Event time of the record with sequence number 0
pub(crate) fn base_time() -> EventTime {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

/// A deterministic record of the given kind, `i` seconds after [base_time]
pub(crate) fn sample_record(kind: StreamKind, i: u64) -> Record {
    sample_record_at(kind, i, i as i64)
}

/// A deterministic record with sequence number `i` and an event time `secs` seconds after
/// [base_time]
pub(crate) fn sample_record_at(kind: StreamKind, i: u64, secs: i64) -> Record {
    let envelope = Envelope {
        id: format!("{}-{i}", kind.stream_name()),
        device_id: "Vehicle-citystream-123".to_owned(),
        timestamp: base_time() + TimeDelta::seconds(secs),
    };
    let step = i as f64;
    let payload = match kind {
        StreamKind::Vehicle => Payload::Vehicle(VehicleData {
            location: Location::Coordinates(51.5074 + step * 0.0001, -0.1278 + step * 0.0001),
            speed: 40.0 + step,
            direction: "North-East".to_owned(),
            make: "BMW".to_owned(),
            model: "C500".to_owned(),
            year: 2024,
            fuel_type: "Hybrid".to_owned(),
        }),
        StreamKind::Gps => Payload::Gps(GpsData {
            speed: 10.0 + step,
            direction: "North-East".to_owned(),
            vehicle_type: "private".to_owned(),
        }),
        StreamKind::TrafficCamera => Payload::TrafficCamera(TrafficCameraData {
            camera_id: format!("camera-{}", i % 4),
            location: Location::Coordinates(51.5, -0.12),
            snapshot: "Base64EncodedString".to_owned(),
        }),
        StreamKind::Weather => Payload::Weather(WeatherData {
            location: Location::Text("51.5,-0.12".to_owned()),
            temperature: -5.0 + step,
            humidity: (i % 100) as i32,
            wind_speed: 3.5,
            weather_condition: "Cloudy".to_owned(),
            precipitation: 0.2,
            air_quality_index: 42.0,
        }),
        StreamKind::EmergencyIncident => Payload::EmergencyIncident(EmergencyIncidentData {
            location: Location::Text("Oxford Street".to_owned()),
            description: "Description of the incident".to_owned(),
            incident_type: "Accident".to_owned(),
            incident_id: format!("incident-{i}"),
            status: "Active".to_owned(),
        }),
    };
    Record::new(envelope, payload)
}

/// Pipeline settings with short timeouts and retry delays
pub(crate) fn test_config(max_batch_size: usize) -> PipelineConfig {
    PipelineConfig::builder()
        .max_batch_size(max_batch_size)
        .max_batch_window(Duration::from_secs(60))
        .poll_timeout(Duration::from_millis(20))
        .retry(
            RetryPolicy::builder()
                .storage_min_delay(Duration::from_millis(5))
                .storage_max_delay(Duration::from_millis(50))
                .storage_max_attempts(3)
                .broker_min_delay(Duration::from_millis(5))
                .broker_max_delay(Duration::from_millis(50))
                .build(),
        )
        .build()
}

#[derive(Debug, Default)]
struct TopicLog {
    next_offset: Offset,
    // in delivery order, which may contain redeliveries
    deliveries: Vec<RawMessage>,
    closed: bool,
}

/// An in-memory message broker. Clones share the same topics.
#[derive(Debug, Clone)]
pub(crate) struct MemoryBroker {
    topics: Arc<Mutex<HashMap<String, TopicLog>>>,
    available: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub(crate) fn new() -> Self {
        Self {
            topics: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Append a message, returning its offset
    pub(crate) fn publish(&self, topic: &str, payload: Vec<u8>) -> Offset {
        let mut topics = self.topics.lock().unwrap();
        let log = topics.entry(topic.to_owned()).or_default();
        let offset = log.next_offset;
        log.next_offset += 1;
        log.deliveries.push(RawMessage { offset, payload });
        offset
    }

    pub(crate) fn publish_record(&self, topic: &str, record: &Record) -> Offset {
        self.publish(topic, record.to_json().unwrap())
    }

    /// Deliver the message at `offset` once more
    pub(crate) fn redeliver(&self, topic: &str, offset: Offset) {
        let mut topics = self.topics.lock().unwrap();
        let log = topics.get_mut(topic).unwrap();
        let message = log
            .deliveries
            .iter()
            .find(|m| m.offset == offset)
            .cloned()
            .unwrap();
        log.deliveries.push(message);
    }

    /// Remove every delivery of `offset`, as log compaction or retention would
    pub(crate) fn compact(&self, topic: &str, offset: Offset) {
        let mut topics = self.topics.lock().unwrap();
        let log = topics.get_mut(topic).unwrap();
        log.deliveries.retain(|m| m.offset != offset);
    }

    /// Readers see the end of the stream after the last message published so far
    pub(crate) fn close(&self, topic: &str) {
        let mut topics = self.topics.lock().unwrap();
        topics.entry(topic.to_owned()).or_default().closed = true;
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), BrokerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("memory broker offline".into()))
        }
    }
}

#[async_trait]
impl MessageSource for MemoryBroker {
    async fn subscribe(
        &self,
        topic: &str,
        start_offset: Offset,
    ) -> Result<Box<dyn MessageStream>, BrokerError> {
        self.check_available()?;
        Ok(Box::new(MemoryStream {
            broker: self.clone(),
            topic: topic.to_owned(),
            position: 0,
            start_offset,
        }))
    }
}

struct MemoryStream {
    broker: MemoryBroker,
    topic: String,
    position: usize,
    start_offset: Offset,
}

impl MemoryStream {
    fn poll(&mut self) -> Option<Option<RawMessage>> {
        let topics = self.broker.topics.lock().unwrap();
        let Some(log) = topics.get(&self.topic) else {
            return None;
        };
        while let Some(message) = log.deliveries.get(self.position) {
            self.position += 1;
            if message.offset >= self.start_offset {
                return Some(Some(message.clone()));
            }
        }
        log.closed.then_some(None)
    }
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn next_message(&mut self) -> Result<Option<RawMessage>, BrokerError> {
        loop {
            self.broker.check_available()?;
            if let Some(polled) = self.poll() {
                return Ok(polled);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// In-memory [DurableStorage] which can be told to fail writes
#[derive(Debug, Default)]
pub(crate) struct FlakyStorage {
    objects: Mutex<BTreeMap<Path, Bytes>>,
    // writes still to fail, usize::MAX fails forever
    failures: Mutex<usize>,
    failing_prefix: Mutex<Option<Path>>,
    attempts: Mutex<HashMap<Path, usize>>,
}

impl FlakyStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes
    pub(crate) fn fail_next_writes(&self, count: usize) {
        *self.failures.lock().unwrap() = count;
    }

    /// Fail every write below `prefix`
    pub(crate) fn fail_writes_below(&self, prefix: Path) {
        *self.failing_prefix.lock().unwrap() = Some(prefix);
    }

    /// Write attempts made for `key`, failed ones included
    pub(crate) fn write_attempts(&self, key: &Path) -> usize {
        self.attempts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub(crate) fn contains(&self, key: &Path) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub(crate) fn get(&self, key: &Path) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// All keys in lexicographic order
    pub(crate) fn keys(&self) -> Vec<Path> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    fn should_fail(&self, key: &Path) -> bool {
        let below_prefix = self
            .failing_prefix
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|p| key.prefix_matches(p));
        if below_prefix {
            return true;
        }
        let mut failures = self.failures.lock().unwrap();
        match *failures {
            0 => false,
            usize::MAX => true,
            _ => {
                *failures -= 1;
                true
            }
        }
    }
}

fn injected_failure() -> StorageError {
    StorageError::ObjectStore(object_store::Error::Generic {
        store: "flaky",
        source: "injected failure".into(),
    })
}

#[async_trait]
impl DurableStorage for FlakyStorage {
    async fn write_object(&self, key: &Path, bytes: Bytes) -> Result<(), StorageError> {
        *self.attempts.lock().unwrap().entry(key.clone()).or_default() += 1;
        if self.should_fail(key) {
            return Err(injected_failure());
        }
        self.objects.lock().unwrap().insert(key.clone(), bytes);
        Ok(())
    }

    async fn read_object(&self, key: &Path) -> Result<Option<Bytes>, StorageError> {
        Ok(self.get(key))
    }

    async fn list(&self, prefix: &Path) -> Result<Vec<Path>, StorageError> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|k| k.prefix_matches(prefix))
            .collect())
    }
}

/// [CheckpointStore] keeping the full history of every stream's checkpoints
#[derive(Debug, Default)]
pub(crate) struct RecordingCheckpoints {
    history: Mutex<HashMap<String, Vec<Checkpoint>>>,
    failing: AtomicBool,
}

impl RecordingCheckpoints {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every following update fail, or succeed again
    pub(crate) fn fail_sets(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// Every offset the stream's checkpoint was set to, in order
    pub(crate) fn offsets(&self, stream: &str) -> Vec<Offset> {
        self.history(stream).iter().map(|c| c.offset).collect()
    }

    pub(crate) fn history(&self, stream: &str) -> Vec<Checkpoint> {
        self.history
            .lock()
            .unwrap()
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CheckpointStore for RecordingCheckpoints {
    async fn get_checkpoint(&self, stream: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.history(stream).last().copied())
    }

    async fn set_checkpoint(
        &self,
        stream: &str,
        checkpoint: Checkpoint,
    ) -> Result<(), CheckpointError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CheckpointError::Storage(injected_failure()));
        }
        let mut history = self.history.lock().unwrap();
        let entries = history.entry(stream.to_owned()).or_default();
        if let Some(last) = entries.last().filter(|c| c.offset > checkpoint.offset) {
            return Err(CheckpointError::Regression {
                stream: stream.to_owned(),
                persisted: last.offset,
                requested: checkpoint.offset,
            });
        }
        entries.push(checkpoint);
        Ok(())
    }
}
