//! Citystream ingests smart-city telemetry from a message broker into columnar storage.
//!
//! Every stream is read, validated, filtered by event time, grouped into batches and written to
//! object storage as Parquet, with a per-stream checkpoint marking the durable progress.
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod errorhandling;
pub mod pipeline;
pub mod reader;
pub mod schema;
pub mod sink;
pub mod storage;
pub mod types;
pub mod watermark;

#[cfg(test)]
pub(crate) mod testing;
