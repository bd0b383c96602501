use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::types::{Batch, Offset, OffsetRange, Record};

/// Groups the accepted records of one stream into batches.
///
/// The assembler accounts for every offset it is shown, whether the message at that offset
/// was accepted or rejected, so consecutive batches cover contiguous offset ranges.
#[derive(Debug)]
pub struct BatchAssembler {
    stream: String,
    max_batch_size: usize,
    max_batch_window: Duration,
    // first offset of the open batch
    start: Offset,
    // first offset not yet accounted for
    next: Offset,
    records: Vec<Record>,
    // arrival of the first message of the open batch
    opened_at: Option<Instant>,
    pinned_end: Option<Offset>,
    // pinned batch closed early by a gap in the offsets
    ready: Option<Batch>,
}

impl BatchAssembler {
    /// Start assembling batches at `start`
    pub fn new(
        stream: impl Into<String>,
        start: Offset,
        max_batch_size: usize,
        max_batch_window: Duration,
    ) -> Self {
        Self {
            stream: stream.into(),
            max_batch_size: max_batch_size.max(1),
            max_batch_window,
            start,
            next: start,
            records: Vec::new(),
            opened_at: None,
            pinned_end: None,
            ready: None,
        }
    }

    /// Force the first batch to end exactly at `end`, regardless of size and time window.
    /// Used when replaying a range which was written before but never checkpointed, so the
    /// replay overwrites the existing object instead of creating an overlapping one.
    ///
    /// If the source skips over `end`, e.g. because messages were compacted away, the batch
    /// is still closed at `end` and the message past it opens the next batch.
    pub fn pin_end(&mut self, end: Offset) {
        if end > self.start {
            self.pinned_end = Some(end);
        }
    }

    /// Add an accepted record at `offset`
    pub fn accept(&mut self, offset: Offset, record: Record, now: Instant) {
        self.advance(offset, now);
        self.records.push(record);
    }

    /// Account for a rejected message at `offset`
    pub fn skip(&mut self, offset: Offset, now: Instant) {
        self.advance(offset, now);
    }

    fn advance(&mut self, offset: Offset, now: Instant) {
        debug_assert!(offset >= self.next, "offset {offset} seen twice");
        if let Some(end) = self.pinned_end.filter(|end| offset >= *end && self.next < *end) {
            debug!("Offsets {}..{end} are gone, closing replayed batch at {end}", self.next);
            self.next = end;
            self.ready = Some(self.take());
        }
        self.next = self.next.max(offset + 1);
        self.opened_at.get_or_insert(now);
    }

    /// Seal the open batch if it reached its size limit or its time window elapsed.
    /// Call until it returns `None`, a replayed batch may be pending in front of the open one.
    pub fn maybe_seal(&mut self, now: Instant) -> Option<Batch> {
        if let Some(batch) = self.ready.take() {
            return Some(batch);
        }
        if let Some(end) = self.pinned_end {
            return (self.next >= end).then(|| self.take());
        }
        let full = self.records.len() >= self.max_batch_size;
        let expired = self
            .opened_at
            .is_some_and(|t| now.saturating_duration_since(t) >= self.max_batch_window);
        (full || expired).then(|| self.take())
    }

    /// Seal whatever is open. Returns `None` if no offsets are pending, or if a pinned range
    /// has not been replayed completely yet. Call until it returns `None`.
    pub fn seal(&mut self) -> Option<Batch> {
        if let Some(batch) = self.ready.take() {
            return Some(batch);
        }
        if self.pinned_end.is_some_and(|end| self.next < end) {
            return None;
        }
        (self.next > self.start).then(|| self.take())
    }

    /// Offsets accounted for by the open batch
    pub fn open_range(&self) -> OffsetRange {
        OffsetRange::new(self.start, self.next)
    }

    fn take(&mut self) -> Batch {
        let range = self.open_range();
        self.start = self.next;
        self.opened_at = None;
        self.pinned_end = None;
        Batch::new(self.stream.clone(), range, std::mem::take(&mut self.records))
    }
}
