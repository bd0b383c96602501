//! Static catalogue of the record kinds ingested by citystream.
//!
//! Every stream carries exactly one kind of record. The [SchemaRegistry] maps stream names to
//! their [StreamDefinition], which holds the ordered field list used for validation and for the
//! columnar layout in storage, the event-time field and the allowed lateness used to compute
//! the stream's watermark.
use std::time::Duration;

use indexmap::IndexMap;
use thiserror::Error;

use crate::types::{EventTime, FieldValue, Record};

/// Allowed lateness applied to streams which were not configured otherwise
pub const DEFAULT_ALLOWED_LATENESS: Duration = Duration::from_secs(120);

/// Logical type of a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// UTF-8 string
    Utf8,
    /// 64 bit float, any JSON number is accepted
    Float64,
    /// 32 bit signed integer, only JSON integers are accepted
    Int32,
    /// Point in time, stored as microseconds since epoch in UTC
    Timestamp,
    /// Geographic position, either a string or a `[latitude, longitude]` pair on the wire.
    /// Stored as a string column.
    Location,
}

/// A single named and typed field of a record schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Name of the field as it appears on the wire and in storage
    pub name: &'static str,
    /// Logical type of the field
    pub field_type: FieldType,
}

const fn field(name: &'static str, field_type: FieldType) -> FieldDef {
    FieldDef { name, field_type }
}

const VEHICLE_FIELDS: &[FieldDef] = &[
    field("id", FieldType::Utf8),
    field("deviceId", FieldType::Utf8),
    field("timestamp", FieldType::Timestamp),
    field("location", FieldType::Location),
    field("speed", FieldType::Float64),
    field("direction", FieldType::Utf8),
    field("make", FieldType::Utf8),
    field("model", FieldType::Utf8),
    field("year", FieldType::Int32),
    field("fuelType", FieldType::Utf8),
];

const GPS_FIELDS: &[FieldDef] = &[
    field("id", FieldType::Utf8),
    field("deviceId", FieldType::Utf8),
    field("timestamp", FieldType::Timestamp),
    field("speed", FieldType::Float64),
    field("direction", FieldType::Utf8),
    field("vehicleType", FieldType::Utf8),
];

const TRAFFIC_CAMERA_FIELDS: &[FieldDef] = &[
    field("id", FieldType::Utf8),
    field("deviceId", FieldType::Utf8),
    field("cameraId", FieldType::Utf8),
    field("timestamp", FieldType::Timestamp),
    field("location", FieldType::Location),
    field("snapshot", FieldType::Utf8),
];

const WEATHER_FIELDS: &[FieldDef] = &[
    field("id", FieldType::Utf8),
    field("deviceId", FieldType::Utf8),
    field("timestamp", FieldType::Timestamp),
    field("location", FieldType::Location),
    field("temperature", FieldType::Float64),
    field("humidity", FieldType::Int32),
    field("windSpeed", FieldType::Float64),
    field("weatherCondition", FieldType::Utf8),
    field("precipitation", FieldType::Float64),
    field("airQualityIndex", FieldType::Float64),
];

const EMERGENCY_INCIDENT_FIELDS: &[FieldDef] = &[
    field("id", FieldType::Utf8),
    field("deviceId", FieldType::Utf8),
    field("timestamp", FieldType::Timestamp),
    field("location", FieldType::Location),
    field("description", FieldType::Utf8),
    field("type", FieldType::Utf8),
    field("incidentId", FieldType::Utf8),
    field("status", FieldType::Utf8),
];

/// The closed set of record kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Position, speed and make of the simulated vehicle
    Vehicle,
    /// Raw GPS fixes
    Gps,
    /// Traffic camera snapshots
    TrafficCamera,
    /// Weather station readings
    Weather,
    /// Emergency incident reports
    EmergencyIncident,
}

impl StreamKind {
    /// All kinds in registration order
    pub const ALL: [StreamKind; 5] = [
        StreamKind::Vehicle,
        StreamKind::Gps,
        StreamKind::TrafficCamera,
        StreamKind::Weather,
        StreamKind::EmergencyIncident,
    ];

    /// Canonical stream name of this kind. This is also the default topic name.
    pub fn stream_name(&self) -> &'static str {
        match self {
            StreamKind::Vehicle => "vehicle_data",
            StreamKind::Gps => "gps_data",
            StreamKind::TrafficCamera => "traffic_data",
            StreamKind::Weather => "weather_data",
            StreamKind::EmergencyIncident => "emergency_data",
        }
    }

    /// Ordered field list of this kind
    pub fn fields(&self) -> &'static [FieldDef] {
        match self {
            StreamKind::Vehicle => VEHICLE_FIELDS,
            StreamKind::Gps => GPS_FIELDS,
            StreamKind::TrafficCamera => TRAFFIC_CAMERA_FIELDS,
            StreamKind::Weather => WEATHER_FIELDS,
            StreamKind::EmergencyIncident => EMERGENCY_INCIDENT_FIELDS,
        }
    }
}

/// Immutable description of one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDefinition {
    /// Unique stream name
    pub name: String,
    /// Kind of records carried on this stream
    pub kind: StreamKind,
    /// Ordered field schema
    pub fields: &'static [FieldDef],
    /// Name of the field holding the event time
    pub event_time_field: &'static str,
    /// Duration subtracted from the maximum observed event time to compute the watermark
    pub allowed_lateness: Duration,
}

impl StreamDefinition {
    fn for_kind(kind: StreamKind) -> Self {
        Self {
            name: kind.stream_name().to_owned(),
            kind,
            fields: kind.fields(),
            event_time_field: "timestamp",
            allowed_lateness: DEFAULT_ALLOWED_LATENESS,
        }
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Event time of `record`, read from [StreamDefinition::event_time_field].
    /// `None` if the record has no such field or it does not hold a timestamp.
    pub fn event_time(&self, record: &Record) -> Option<EventTime> {
        match record.field(self.event_time_field)? {
            FieldValue::Timestamp(time) => Some(time),
            _ => None,
        }
    }
}

/// Returned when looking up a stream which was never registered
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown stream '{0}'")]
pub struct UnknownStreamError(pub String);

/// Catalogue of all known stream definitions.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    definitions: IndexMap<String, StreamDefinition>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        let definitions = StreamKind::ALL
            .into_iter()
            .map(StreamDefinition::for_kind)
            .map(|d| (d.name.clone(), d))
            .collect();
        Self { definitions }
    }
}

impl SchemaRegistry {
    /// Registry holding all five kinds with the default allowed lateness
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the allowed lateness of a single stream
    pub fn with_allowed_lateness(
        mut self,
        stream_name: &str,
        allowed_lateness: Duration,
    ) -> Result<Self, UnknownStreamError> {
        let definition = self
            .definitions
            .get_mut(stream_name)
            .ok_or_else(|| UnknownStreamError(stream_name.to_owned()))?;
        definition.allowed_lateness = allowed_lateness;
        Ok(self)
    }

    /// Get the definition of the given stream
    pub fn definition_for(&self, stream_name: &str) -> Result<&StreamDefinition, UnknownStreamError> {
        self.definitions
            .get(stream_name)
            .ok_or_else(|| UnknownStreamError(stream_name.to_owned()))
    }

    /// All definitions in registration order
    pub fn definitions(&self) -> impl Iterator<Item = &StreamDefinition> {
        self.definitions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The registry must contain exactly the five kinds
    #[test]
    fn enumerates_five_kinds() {
        let registry = SchemaRegistry::new();
        let names: Vec<_> = registry.definitions().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "vehicle_data",
                "gps_data",
                "traffic_data",
                "weather_data",
                "emergency_data"
            ]
        );
    }

    /// every definition must contain the envelope fields and its event time field
    #[test]
    fn definitions_contain_envelope() {
        for def in SchemaRegistry::new().definitions() {
            for name in ["id", "deviceId", def.event_time_field] {
                assert!(def.field(name).is_some(), "{} lacks {name}", def.name);
            }
            assert_eq!(
                def.field(def.event_time_field).unwrap().field_type,
                FieldType::Timestamp
            );
            assert_eq!(def.allowed_lateness, DEFAULT_ALLOWED_LATENESS);
        }
    }

    /// The event time is read from the field the definition names
    #[test]
    fn event_time_from_named_field() {
        let gps = SchemaRegistry::new().definition_for("gps_data").unwrap().clone();
        let record = crate::testing::sample_record(StreamKind::Gps, 3);
        assert_eq!(gps.event_time(&record), Some(record.event_time()));

        let by_speed = StreamDefinition {
            event_time_field: "speed",
            ..gps.clone()
        };
        assert_eq!(by_speed.event_time(&record), None);
        let by_unknown = StreamDefinition {
            event_time_field: "arrival",
            ..gps
        };
        assert_eq!(by_unknown.event_time(&record), None);
    }

    #[test]
    fn unknown_stream() {
        let registry = SchemaRegistry::new();
        let err = registry.definition_for("bicycle_data").unwrap_err();
        assert_eq!(err, UnknownStreamError("bicycle_data".into()));
    }

    /// lateness overrides only touch the named stream
    #[test]
    fn override_lateness() {
        let registry = SchemaRegistry::new()
            .with_allowed_lateness("gps_data", Duration::from_secs(5))
            .unwrap();
        assert_eq!(
            registry.definition_for("gps_data").unwrap().allowed_lateness,
            Duration::from_secs(5)
        );
        assert_eq!(
            registry.definition_for("weather_data").unwrap().allowed_lateness,
            DEFAULT_ALLOWED_LATENESS
        );
        assert!(SchemaRegistry::new()
            .with_allowed_lateness("nope", Duration::ZERO)
            .is_err());
    }
}
