//! Glue for running citystream as a service: environment configuration, storage root
//! resolution and the synthetic telemetry generator.
pub mod config;
pub mod generator;
pub mod storage;
