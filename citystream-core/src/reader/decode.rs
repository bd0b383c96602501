use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{FieldDef, FieldType, StreamDefinition, StreamKind};
use crate::types::{
    parse_event_time, EmergencyIncidentData, Envelope, GpsData, Payload, Record,
    TrafficCameraData, VehicleData, WeatherData,
};

/// Reasons a raw message can not be turned into a [Record]
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Payload is not valid JSON")]
    NotJson(#[source] serde_json::Error),
    #[error("Payload is not a JSON object")]
    NotAnObject,
    #[error("Required field '{0}' is missing")]
    MissingField(&'static str),
    #[error("Required field '{0}' is null")]
    NullField(&'static str),
    #[error("Field '{field}' is not of type {expected:?}")]
    FieldType {
        field: &'static str,
        expected: FieldType,
    },
    #[error("Field '{field}' holds an invalid timestamp '{value}'")]
    Timestamp { field: &'static str, value: String },
    #[error("Field '{0}' does not hold the event time")]
    NoEventTime(&'static str),
    #[error("Payload does not match the record layout")]
    Malformed(#[from] serde_json::Error),
}

/// Decode and validate a raw message against the given stream definition.
///
/// Every field of the definition must be present, non-null and of the declared type.
/// Fields not named in the definition are ignored.
pub fn decode(raw: &[u8], definition: &StreamDefinition) -> Result<Record, ParseError> {
    let value: Value = serde_json::from_slice(raw).map_err(ParseError::NotJson)?;
    let Value::Object(object) = &value else {
        return Err(ParseError::NotAnObject);
    };
    for field in definition.fields {
        check_field(object, field)?;
    }

    let envelope = Envelope::deserialize(&value)?;
    let payload = match definition.kind {
        StreamKind::Vehicle => Payload::Vehicle(VehicleData::deserialize(&value)?),
        StreamKind::Gps => Payload::Gps(GpsData::deserialize(&value)?),
        StreamKind::TrafficCamera => {
            Payload::TrafficCamera(TrafficCameraData::deserialize(&value)?)
        }
        StreamKind::Weather => Payload::Weather(WeatherData::deserialize(&value)?),
        StreamKind::EmergencyIncident => {
            Payload::EmergencyIncident(EmergencyIncidentData::deserialize(&value)?)
        }
    };
    Ok(Record::new(envelope, payload))
}

fn check_field(object: &Map<String, Value>, field: &FieldDef) -> Result<(), ParseError> {
    let value = object
        .get(field.name)
        .ok_or(ParseError::MissingField(field.name))?;
    let matches = match (field.field_type, value) {
        (_, Value::Null) => return Err(ParseError::NullField(field.name)),
        (FieldType::Utf8, Value::String(_)) => true,
        (FieldType::Float64, Value::Number(_)) => true,
        (FieldType::Int32, Value::Number(n)) => {
            n.as_i64().is_some_and(|i| i32::try_from(i).is_ok())
        }
        (FieldType::Timestamp, Value::String(s)) => {
            if parse_event_time(s).is_none() {
                return Err(ParseError::Timestamp {
                    field: field.name,
                    value: s.clone(),
                });
            }
            true
        }
        (FieldType::Location, Value::String(_)) => true,
        (FieldType::Location, Value::Array(pair)) => {
            pair.len() == 2 && pair.iter().all(Value::is_number)
        }
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(ParseError::FieldType {
            field: field.name,
            expected: field.field_type,
        })
    }
}
