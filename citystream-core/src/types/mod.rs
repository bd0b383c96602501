//! Data types flowing through a stream pipeline
mod batch;
mod record;

pub use batch::{Batch, OffsetRange};
pub use record::{
    parse_event_time, EmergencyIncidentData, Envelope, EventTime, FieldValue, GpsData, Location,
    Payload, Record, TrafficCameraData, VehicleData, WeatherData,
};

/// Position of a message within one stream. Offsets increase monotonically.
pub type Offset = u64;
