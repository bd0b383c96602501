use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::{Offset, Record};

/// Half-open range `[start, end)` of stream offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetRange {
    /// First offset covered
    pub start: Offset,
    /// First offset **not** covered
    pub end: Offset,
}

impl OffsetRange {
    /// Create a new range
    pub fn new(start: Offset, end: Offset) -> Self {
        debug_assert!(start <= end, "range start {start} after end {end}");
        Self { start, end }
    }

    /// True if the range covers no offsets
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Number of offsets covered
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

impl Display for OffsetRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A sealed, immutable group of accepted records together with the offset range of the source
/// messages it accounts for. The range may cover more messages than there are records, as
/// rejected messages (unparseable or late) are accounted for but not stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    stream: String,
    range: OffsetRange,
    records: Vec<Record>,
}

impl Batch {
    pub(crate) fn new(stream: String, range: OffsetRange, records: Vec<Record>) -> Self {
        Self {
            stream,
            range,
            records,
        }
    }

    /// Name of the stream this batch belongs to
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Offsets covered by this batch
    pub fn range(&self) -> OffsetRange {
        self.range
    }

    /// Accepted records in arrival order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of accepted records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no records were accepted within the range
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_len() {
        assert_eq!(OffsetRange::new(3, 7).len(), 4);
        assert!(OffsetRange::new(5, 5).is_empty());
        assert_eq!(OffsetRange::new(0, 2).to_string(), "[0, 2)");
    }
}
