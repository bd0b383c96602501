//! Event-time progress tracking.
//!
//! The watermark of a stream is the largest event time seen so far minus the stream's allowed
//! lateness. Records with an event time below the watermark are late and get dropped from the
//! output. The watermark never decreases, no matter in which order records arrive.
use std::time::Duration;

use chrono::TimeDelta;

use crate::types::EventTime;

/// Classification of a single record relative to the watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lateness {
    /// The record is at or above the watermark
    OnTime,
    /// The record is below the watermark
    Late,
}

/// Tracks the watermark of a single stream
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    allowed_lateness: TimeDelta,
    max_event_time: Option<EventTime>,
    late_records: u64,
}

impl WatermarkTracker {
    /// Create a tracker which has not observed any records yet
    pub fn new(allowed_lateness: Duration) -> Self {
        Self::resume(allowed_lateness, None)
    }

    /// Create a tracker continuing from a previously observed maximum event time
    pub fn resume(allowed_lateness: Duration, max_event_time: Option<EventTime>) -> Self {
        Self {
            // durations beyond ~292 billion years saturate, nothing is ever late then
            allowed_lateness: TimeDelta::from_std(allowed_lateness).unwrap_or(TimeDelta::MAX),
            max_event_time,
            late_records: 0,
        }
    }

    /// Classify a record by its event time and advance the watermark.
    ///
    /// A record is late if its event time is strictly below the watermark as it stood before
    /// this record was observed. A record exactly at the watermark is on time.
    pub fn classify(&mut self, event_time: EventTime) -> Lateness {
        let lateness = match self.current_watermark() {
            Some(wm) if event_time < wm => Lateness::Late,
            _ => Lateness::OnTime,
        };
        if lateness == Lateness::Late {
            self.late_records += 1;
        }
        self.max_event_time = Some(match self.max_event_time {
            Some(max) => max.max(event_time),
            None => event_time,
        });
        lateness
    }

    /// Current watermark or `None` if no record has been observed yet
    pub fn current_watermark(&self) -> Option<EventTime> {
        self.max_event_time
            .map(|max| max.checked_sub_signed(self.allowed_lateness).unwrap_or(EventTime::MIN_UTC))
    }

    /// Largest event time observed so far
    pub fn max_event_time(&self) -> Option<EventTime> {
        self.max_event_time
    }

    /// Number of records classified as late
    pub fn late_records(&self) -> u64 {
        self.late_records
    }
}
