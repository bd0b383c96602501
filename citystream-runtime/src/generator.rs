//! Synthetic telemetry of a single vehicle travelling from London to Birmingham.
//!
//! Every tick moves the vehicle one step along the route with a bit of jitter, advances its
//! clock by 30 to 60 seconds and emits one record of each kind. Given the same seed and start
//! time the generated records are identical.
use chrono::TimeDelta;
use citystream::schema::StreamKind;
use citystream::types::{
    EmergencyIncidentData, Envelope, EventTime, GpsData, Location, Payload, Record,
    TrafficCameraData, VehicleData, WeatherData,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

/// Start of the journey as `(latitude, longitude)`
pub const LONDON: (f64, f64) = (51.5074, -0.1278);
/// End of the journey as `(latitude, longitude)`
pub const BIRMINGHAM: (f64, f64) = (52.4862, -1.8904);
/// Number of ticks the journey takes
pub const STEPS: u32 = 100;

const JITTER: f64 = 0.0005;
const CAMERA_ID: &str = "Nikon-Cam123";

/// State of the simulated journey
#[derive(Debug)]
pub struct Journey {
    rng: StdRng,
    device_id: String,
    position: (f64, f64),
    clock: EventTime,
    step: u32,
}

impl Journey {
    /// Start a journey in London at `start_time`
    pub fn new(device_id: impl Into<String>, start_time: EventTime, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            device_id: device_id.into(),
            position: LONDON,
            clock: start_time,
            step: 0,
        }
    }

    /// True once Birmingham was reached
    pub fn is_finished(&self) -> bool {
        self.step >= STEPS
    }

    /// Ticks taken so far
    pub fn step(&self) -> u32 {
        self.step
    }

    /// Move one step and emit one record of each kind, in [StreamKind::ALL] order.
    /// Returns `None` once the journey is finished.
    pub fn tick(&mut self) -> Option<Vec<Record>> {
        if self.is_finished() {
            return None;
        }
        self.step += 1;
        let steps = f64::from(STEPS);
        self.position.0 += (BIRMINGHAM.0 - LONDON.0) / steps + self.rng.gen_range(-JITTER..=JITTER);
        self.position.1 += (BIRMINGHAM.1 - LONDON.1) / steps + self.rng.gen_range(-JITTER..=JITTER);
        self.clock += TimeDelta::seconds(self.rng.gen_range(30..=60));

        let location = Location::Coordinates(self.position.0, self.position.1);
        let records = StreamKind::ALL
            .into_iter()
            .map(|kind| {
                let payload = self.payload(kind, &location);
                Record::new(self.envelope(), payload)
            })
            .collect();
        Some(records)
    }

    fn uuid(&mut self) -> String {
        Uuid::from_bytes(self.rng.r#gen()).to_string()
    }

    fn envelope(&mut self) -> Envelope {
        Envelope {
            id: self.uuid(),
            device_id: self.device_id.clone(),
            timestamp: self.clock,
        }
    }

    fn pick(&mut self, options: &[&str]) -> String {
        options
            .choose(&mut self.rng)
            .copied()
            .unwrap_or_default()
            .to_owned()
    }

    fn payload(&mut self, kind: StreamKind, location: &Location) -> Payload {
        match kind {
            StreamKind::Vehicle => Payload::Vehicle(VehicleData {
                location: location.clone(),
                speed: self.rng.gen_range(10.0..40.0),
                direction: "North-East".to_owned(),
                make: "BMW".to_owned(),
                model: "C500".to_owned(),
                year: 2024,
                fuel_type: "Hybrid".to_owned(),
            }),
            StreamKind::Gps => Payload::Gps(GpsData {
                speed: self.rng.gen_range(0.0..40.0),
                direction: "North-East".to_owned(),
                vehicle_type: "private".to_owned(),
            }),
            StreamKind::TrafficCamera => Payload::TrafficCamera(TrafficCameraData {
                camera_id: CAMERA_ID.to_owned(),
                location: location.clone(),
                snapshot: "Base64EncodedString".to_owned(),
            }),
            StreamKind::Weather => Payload::Weather(WeatherData {
                location: location.clone(),
                temperature: self.rng.gen_range(-5.0..26.0),
                humidity: self.rng.gen_range(0..=100),
                wind_speed: self.rng.gen_range(0.0..100.0),
                weather_condition: self.pick(&["Sunny", "Cloudy", "Rainy", "Snowy"]),
                precipitation: self.rng.gen_range(0.0..25.0),
                air_quality_index: self.rng.gen_range(0.0..500.0),
            }),
            StreamKind::EmergencyIncident => Payload::EmergencyIncident(EmergencyIncidentData {
                location: location.clone(),
                description: "Description of the Incident".to_owned(),
                incident_type: self.pick(&["Accident", "Fire", "Medical", "Police", "None"]),
                incident_id: self.uuid(),
                status: self.pick(&["Active", "Solved"]),
            }),
        }
    }
}
