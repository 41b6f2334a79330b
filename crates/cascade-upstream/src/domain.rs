//! The domain (filter) an extraction is scoped to (spec §4.2).

use chrono::{DateTime, Utc};

/// A create-date window, inclusive on both ends (spec §4.2's "create-date window").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    /// `YYYY-MM-DD`, inclusive.
    pub from: Option<String>,
    /// `YYYY-MM-DD`, inclusive. Range filters append `23:59:59` (spec §6).
    pub to: Option<String>,
}

/// The scope of one extraction call: incremental watermark, archived flag,
/// a specific id list, or a create-date window (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Domain {
    /// `write_date > watermark`; suppressed when `record_ids` is set (spec §4.2).
    pub watermark: Option<DateTime<Utc>>,
    /// Restrict to these upstream ids. Implies the watermark is dropped.
    pub record_ids: Option<Vec<u64>>,
    /// Include archived/inactive records. Defaults to excluding them.
    pub include_archived: bool,
    /// Create-date window, independent of the watermark.
    pub create_date_window: Option<DateWindow>,
}

impl Domain {
    /// A domain restricted to an explicit id list — the shape cascade
    /// sub-syncs use for dependency expansion (spec §4.6 step 6: "the
    /// domain is restricted to the requested id list").
    #[must_use]
    pub fn for_ids(ids: Vec<u64>) -> Self {
        Self { record_ids: Some(ids), ..Self::default() }
    }

    /// Whether the watermark predicate applies. A specific-id list always
    /// suppresses it (spec §4.2).
    #[must_use]
    pub fn watermark_applies(&self) -> bool {
        self.watermark.is_some() && self.record_ids.is_none()
    }

    /// Drops the create-date window, as cascade dependency expansion does
    /// for FK targets — "the date filter (if any) is dropped for FK
    /// targets; the primary date window applies only to the origin" (spec §4.6 step 6).
    #[must_use]
    pub fn without_date_window(mut self) -> Self {
        self.create_date_window = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_list_suppresses_watermark() {
        let mut domain = Domain::for_ids(vec![1, 2, 3]);
        domain.watermark = Some(Utc::now());
        assert!(!domain.watermark_applies());
    }

    #[test]
    fn watermark_applies_without_id_list() {
        let domain = Domain { watermark: Some(Utc::now()), ..Domain::default() };
        assert!(domain.watermark_applies());
    }

    #[test]
    fn without_date_window_clears_it() {
        let domain = Domain {
            create_date_window: Some(DateWindow { from: Some("2024-01-01".to_string()), to: None }),
            ..Domain::default()
        };
        assert!(domain.without_date_window().create_date_window.is_none());
    }
}
