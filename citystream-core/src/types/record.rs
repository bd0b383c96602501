use std::borrow::Cow;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::StreamKind;

/// Event time of a record
pub type EventTime = DateTime<Utc>;

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parse an event time. RFC 3339 timestamps are taken as is, zone-less ISO-8601 date-times are
/// interpreted as UTC.
pub fn parse_event_time(raw: &str) -> Option<EventTime> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, NAIVE_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

mod event_time {
    use std::borrow::Cow;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use super::{parse_event_time, EventTime};

    pub(super) fn serialize<S: Serializer>(t: &EventTime, ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_str(&t.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f"))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<EventTime, D::Error> {
        let raw = <Cow<'de, str>>::deserialize(de)?;
        parse_event_time(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'")))
    }
}

/// Fields shared by every record kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique record id
    pub id: String,
    /// Id of the device which produced the record
    pub device_id: String,
    /// Event time
    #[serde(with = "event_time")]
    pub timestamp: EventTime,
}

/// A geographic position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    /// `[latitude, longitude]`
    Coordinates(f64, f64),
    /// Free-form location description
    Text(String),
}

impl Location {
    fn as_column_value(&self) -> Cow<'_, str> {
        match self {
            Location::Coordinates(lat, lon) => Cow::Owned(format!("{lat},{lon}")),
            Location::Text(t) => Cow::Borrowed(t),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleData {
    pub location: Location,
    pub speed: f64,
    pub direction: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub fuel_type: String,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsData {
    pub speed: f64,
    pub direction: String,
    pub vehicle_type: String,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficCameraData {
    pub camera_id: String,
    pub location: Location,
    pub snapshot: String,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherData {
    pub location: Location,
    pub temperature: f64,
    pub humidity: i32,
    pub wind_speed: f64,
    pub weather_condition: String,
    pub precipitation: f64,
    pub air_quality_index: f64,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyIncidentData {
    pub location: Location,
    pub description: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub incident_id: String,
    pub status: String,
}

/// Kind specific part of a record
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Vehicle(VehicleData),
    Gps(GpsData),
    TrafficCamera(TrafficCameraData),
    Weather(WeatherData),
    EmergencyIncident(EmergencyIncidentData),
}

impl Payload {
    /// Kind of this payload
    pub fn kind(&self) -> StreamKind {
        match self {
            Payload::Vehicle(_) => StreamKind::Vehicle,
            Payload::Gps(_) => StreamKind::Gps,
            Payload::TrafficCamera(_) => StreamKind::TrafficCamera,
            Payload::Weather(_) => StreamKind::Weather,
            Payload::EmergencyIncident(_) => StreamKind::EmergencyIncident,
        }
    }
}

/// Value of a single field, borrowed from a record where possible
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    /// String or location value
    Utf8(Cow<'a, str>),
    /// Float value
    Float64(f64),
    /// Integer value
    Int32(i32),
    /// Timestamp value
    Timestamp(EventTime),
}

impl<'a> From<&'a String> for FieldValue<'a> {
    fn from(value: &'a String) -> Self {
        FieldValue::Utf8(Cow::Borrowed(value))
    }
}

impl<'a> From<&'a Location> for FieldValue<'a> {
    fn from(value: &'a Location) -> Self {
        FieldValue::Utf8(value.as_column_value())
    }
}

/// A validated, immutable telemetry record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    envelope: Envelope,
    payload: Payload,
}

#[derive(Serialize)]
struct WireRecord<'a> {
    #[serde(flatten)]
    envelope: &'a Envelope,
    #[serde(flatten)]
    payload: &'a Payload,
}

impl Record {
    /// Create a new record from its parts
    pub fn new(envelope: Envelope, payload: Payload) -> Self {
        Self { envelope, payload }
    }

    /// Unique id of this record
    pub fn id(&self) -> &str {
        &self.envelope.id
    }

    /// Id of the producing device
    pub fn device_id(&self) -> &str {
        &self.envelope.device_id
    }

    /// Event time of this record
    pub fn event_time(&self) -> EventTime {
        self.envelope.timestamp
    }

    /// Kind of this record
    pub fn kind(&self) -> StreamKind {
        self.payload.kind()
    }

    /// Shared envelope fields
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Kind specific fields
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Get a field by its schema name, returning `None` if this record kind has no such field.
    pub fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        let envelope = &self.envelope;
        match name {
            "id" => return Some((&envelope.id).into()),
            "deviceId" => return Some((&envelope.device_id).into()),
            "timestamp" => return Some(FieldValue::Timestamp(envelope.timestamp)),
            _ => (),
        }
        let value = match (&self.payload, name) {
            (Payload::Vehicle(v), "location") => (&v.location).into(),
            (Payload::Vehicle(v), "speed") => FieldValue::Float64(v.speed),
            (Payload::Vehicle(v), "direction") => (&v.direction).into(),
            (Payload::Vehicle(v), "make") => (&v.make).into(),
            (Payload::Vehicle(v), "model") => (&v.model).into(),
            (Payload::Vehicle(v), "year") => FieldValue::Int32(v.year),
            (Payload::Vehicle(v), "fuelType") => (&v.fuel_type).into(),

            (Payload::Gps(g), "speed") => FieldValue::Float64(g.speed),
            (Payload::Gps(g), "direction") => (&g.direction).into(),
            (Payload::Gps(g), "vehicleType") => (&g.vehicle_type).into(),

            (Payload::TrafficCamera(t), "cameraId") => (&t.camera_id).into(),
            (Payload::TrafficCamera(t), "location") => (&t.location).into(),
            (Payload::TrafficCamera(t), "snapshot") => (&t.snapshot).into(),

            (Payload::Weather(w), "location") => (&w.location).into(),
            (Payload::Weather(w), "temperature") => FieldValue::Float64(w.temperature),
            (Payload::Weather(w), "humidity") => FieldValue::Int32(w.humidity),
            (Payload::Weather(w), "windSpeed") => FieldValue::Float64(w.wind_speed),
            (Payload::Weather(w), "weatherCondition") => (&w.weather_condition).into(),
            (Payload::Weather(w), "precipitation") => FieldValue::Float64(w.precipitation),
            (Payload::Weather(w), "airQualityIndex") => FieldValue::Float64(w.air_quality_index),

            (Payload::EmergencyIncident(e), "location") => (&e.location).into(),
            (Payload::EmergencyIncident(e), "description") => (&e.description).into(),
            (Payload::EmergencyIncident(e), "type") => (&e.incident_type).into(),
            (Payload::EmergencyIncident(e), "incidentId") => (&e.incident_id).into(),
            (Payload::EmergencyIncident(e), "status") => (&e.status).into(),
            _ => return None,
        };
        Some(value)
    }

    /// Encode this record as a flat JSON object, the format expected on the message stream
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&WireRecord {
            envelope: &self.envelope,
            payload: &self.payload,
        })
    }
}
