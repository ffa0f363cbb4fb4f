use std::hash::Hash;

use chrono::{DateTime, Utc};

use crate::offset::Offset;

/// The host's record type, as it appears on the partition.
///
/// The core never interprets payloads (spec §1 Non-goals); it only needs
/// to know a record's key (if any), its offset, and its watermark.
pub trait Record: Send + Sync {
    type Key: Eq + Hash + Clone + Send + Sync + 'static;

    /// `None` for an unkeyed record — such records are skipped for
    /// per-key delivery but still count for grouping (spec §4.4 edge
    /// cases).
    fn key(&self) -> Option<&Self::Key>;

    fn offset(&self) -> Offset;

    /// The broker-assigned event time, if the record carried one.
    fn watermark(&self) -> Option<DateTime<Utc>>;
}
