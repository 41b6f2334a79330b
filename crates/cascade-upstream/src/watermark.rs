//! Incremental sync watermark tracking (spec §4.2, §6 "Persistent state").
//!
//! One entry per (model, source); holds the last-sync timestamp and enough
//! bookkeeping to answer "what changed since last time" without retaining
//! any records (spec §4.6, "Incremental watermarks are tracked by carrying
//! the maximum `write_date` seen so far rather than retaining records").
//! Persistence itself (atomic write-temp-then-rename) is a host concern;
//! this module is the in-memory shape plus the accumulator.

use chrono::{DateTime, Utc};

/// Persisted sync metadata for one model (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMetadata {
    /// Technical model name this metadata describes.
    pub model: String,
    /// ISO-8601 timestamp of the last successful sync.
    pub last_sync: DateTime<Utc>,
    /// Record count observed at that sync.
    pub record_count: u64,
    /// Oldest `create_date` observed, if tracked.
    pub oldest_create_date: Option<String>,
    /// Upstream id of the oldest-create-date record.
    pub oldest_id: Option<u64>,
    /// Newest `create_date` observed, if tracked.
    pub newest_create_date: Option<String>,
    /// Upstream id of the newest-create-date record.
    pub newest_id: Option<u64>,
}

impl SyncMetadata {
    /// A fresh metadata record for a model that has never synced.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            last_sync: DateTime::<Utc>::UNIX_EPOCH,
            record_count: 0,
            oldest_create_date: None,
            oldest_id: None,
            newest_create_date: None,
            newest_id: None,
        }
    }
}

/// Accumulates the maximum `write_date` seen across a batch stream without
/// retaining the records themselves, so memory stays O(1) per sync (spec §4.6).
#[derive(Debug, Clone, Default)]
pub struct WatermarkAccumulator {
    max_write_date: Option<DateTime<Utc>>,
    records_seen: u64,
}

impl WatermarkAccumulator {
    /// A fresh accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one record's `write_date` into the running maximum.
    pub fn observe(&mut self, write_date: DateTime<Utc>) {
        self.max_write_date = Some(self.max_write_date.map_or(write_date, |cur| cur.max(write_date)));
        self.records_seen += 1;
    }

    /// The highest `write_date` observed so far, if any.
    #[must_use]
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.max_write_date
    }

    /// Total records folded in.
    #[must_use]
    pub fn records_seen(&self) -> u64 {
        self.records_seen
    }

    /// Finalizes into a [`SyncMetadata`] for persistence, carrying forward
    /// any existing metadata's record count when this run saw nothing new.
    #[must_use]
    pub fn into_metadata(self, model: impl Into<String>, now: DateTime<Utc>) -> SyncMetadata {
        SyncMetadata {
            model: model.into(),
            last_sync: self.max_write_date.unwrap_or(now),
            record_count: self.records_seen,
            oldest_create_date: None,
            oldest_id: None,
            newest_create_date: None,
            newest_id: None,
        }
    }
}
