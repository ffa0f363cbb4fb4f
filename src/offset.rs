use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::PartitionFlowError;

/// A monotonically non-decreasing position in a partition log.
///
/// Newtype over `u64` rather than a bare integer, following the teacher's
/// habit of wrapping protocol primitives (see `common/kafka`'s use of
/// distinct error/config types per concern) so offsets can't be confused
/// with arbitrary counters at a type level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(pub u64);

impl Offset {
    pub fn new(offset: u64) -> Self {
        Offset(offset)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The offset a consumer would resume from: one past a processed record.
///
/// Total except for overflow at `u64::MAX`, which is `PartitionFlowError::OffsetOverflow`
/// per spec §6/§7 — this is the one place the core can fail outside of a
/// host-supplied collaborator.
pub fn offset_to_commit(offset: Offset) -> Result<Offset, PartitionFlowError> {
    offset
        .0
        .checked_add(1)
        .map(Offset)
        .ok_or(PartitionFlowError::OffsetOverflow)
}

/// Identifies the partition a `PartitionFlow` is responsible for; used only
/// for logging/metrics tags and to hand to `KeyStateOf::all_keys`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// `{wall_clock, optional watermark, offset}`, passed through the pipeline.
///
/// `watermark` is the broker-assigned event time of the record that
/// produced this timestamp; absent for records without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub clock: DateTime<Utc>,
    pub watermark: Option<DateTime<Utc>>,
    pub offset: Offset,
}

impl Timestamp {
    pub fn new(clock: DateTime<Utc>, watermark: Option<DateTime<Utc>>, offset: Offset) -> Self {
        Self {
            clock,
            watermark,
            offset,
        }
    }
}
