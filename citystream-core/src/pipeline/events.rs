use object_store::path::Path;

use crate::types::{EventTime, Offset, OffsetRange};

/// Observable happenings of a running stream pipeline
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A message could not be decoded and was dropped
    ParseError {
        stream: String,
        offset: Offset,
        reason: String,
    },
    /// A record arrived below the watermark and was dropped
    LateRecord {
        stream: String,
        offset: Offset,
        event_time: EventTime,
        watermark: EventTime,
    },
    /// A batch was stored and the checkpoint moved to the end of its range
    BatchCommitted {
        stream: String,
        range: OffsetRange,
        records: usize,
        key: Option<Path>,
    },
    /// The pipeline stopped due to a fatal error
    Fatal { stream: String, message: String },
}

impl PipelineEvent {
    /// Stream this event belongs to
    pub fn stream(&self) -> &str {
        match self {
            PipelineEvent::ParseError { stream, .. }
            | PipelineEvent::LateRecord { stream, .. }
            | PipelineEvent::BatchCommitted { stream, .. }
            | PipelineEvent::Fatal { stream, .. } => stream,
        }
    }
}

/// Counters of a stream pipeline, returned once it stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    /// Name of the stream
    pub stream: String,
    /// Messages read from the broker, redeliveries excluded
    pub messages: u64,
    /// Records accepted into batches
    pub accepted: u64,
    /// Messages which failed to decode
    pub parse_errors: u64,
    /// Records dropped for being late
    pub late_records: u64,
    /// Redelivered messages which were skipped
    pub duplicates: u64,
    /// Batches committed, including those without records
    pub batches: u64,
    /// Broker errors which were retried
    pub broker_retries: u64,
    /// Checkpoint offset when the pipeline stopped
    pub checkpoint: Offset,
}
