//! Response shaping (spec §4.9, "Response shaping"): token estimation,
//! `detail_level` application, and the export-descriptor contract.
//!
//! Serializing to the external export format and writing it to object
//! storage is an out-of-scope collaborator (spec §1); this module only
//! produces the descriptor a caller of `export_to_file` gets back.

use crate::aggregator::GroupResult;

/// How much of a response to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    /// Grand total, record count and checksum only.
    Summary,
    /// Top `top_n` groups by the primary aggregation, plus a remainder row.
    TopN,
    /// Everything.
    Full,
}

/// Token-budget threshold above which a lower `detail_level` is
/// recommended (spec §4.9, "default 10,000").
pub const DEFAULT_TOKEN_THRESHOLD: u64 = 10_000;

/// Estimates response size in tokens for a simple (ungrouped) aggregation:
/// `300 + 25 * |aggs|`.
#[must_use]
pub fn estimate_simple_aggregation_tokens(aggregation_count: usize) -> u64 {
    300 + 25 * aggregation_count as u64
}

/// Estimates response size in tokens for a grouped aggregation:
/// `300 + G * (50 + extras)`, where `extras` is the per-group payload
/// beyond the group key (one unit per aggregation alias).
#[must_use]
pub fn estimate_grouped_aggregation_tokens(group_count: usize, aggregation_count: usize) -> u64 {
    300 + group_count as u64 * (50 + aggregation_count as u64)
}

/// Estimates response size in tokens for record mode:
/// `250 + N * 100 * (fields / 10)`, with a 1.5x nested-object factor and a
/// 3x cap per record.
#[must_use]
pub fn estimate_record_mode_tokens(record_count: usize, field_count: usize, has_nested_objects: bool) -> u64 {
    let per_record_base = 100.0 * (field_count as f64 / 10.0).max(0.1);
    let per_record = if has_nested_objects { per_record_base * 1.5 } else { per_record_base };
    let per_record = per_record.min(per_record_base * 3.0);
    250 + (record_count as f64 * per_record).round() as u64
}

/// Applies `detail_level` to a (possibly large) set of aggregation groups:
/// `summary` drops all groups, `top_n` truncates to `top_n` plus a
/// remainder marker, `full` returns everything unchanged.
#[must_use]
pub fn shape_groups(groups: Vec<GroupResult>, detail_level: DetailLevel, top_n: usize) -> (Vec<GroupResult>, Option<usize>) {
    match detail_level {
        DetailLevel::Summary => (Vec::new(), None),
        DetailLevel::Full => (groups, None),
        DetailLevel::TopN => {
            let top_n = top_n.min(100);
            if groups.len() <= top_n {
                (groups, None)
            } else {
                let remaining = groups.len() - top_n;
                let mut kept = groups;
                kept.truncate(top_n);
                (kept, Some(remaining))
            }
        }
    }
}

/// Recommends the lowest detail level whose estimated token count fits
/// under `threshold`, given callbacks to (re-)estimate at each level.
#[must_use]
pub fn recommend_detail_level(estimated_tokens: u64, threshold: u64, requested: DetailLevel) -> DetailLevel {
    if estimated_tokens <= threshold {
        return requested;
    }
    match requested {
        DetailLevel::Full => DetailLevel::TopN,
        DetailLevel::TopN => DetailLevel::Summary,
        DetailLevel::Summary => DetailLevel::Summary,
    }
}

/// Descriptor returned instead of inline records when `export_to_file` is set.
#[derive(Debug, Clone)]
pub struct ExportDescriptor {
    pub filename: String,
    pub location: String,
}

/// Builds an export descriptor for a query result. Writing the file
/// itself is delegated to the export-storage collaborator (spec §1); this
/// is the contract the caller gets back, not the writer.
#[must_use]
pub fn export_descriptor(model: &str, now: chrono::DateTime<chrono::Utc>) -> ExportDescriptor {
    let filename = format!("{model}-{}.json", now.format("%Y%m%dT%H%M%SZ"));
    ExportDescriptor { filename: filename.clone(), location: format!("exports/{filename}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn simple_aggregation_formula() {
        assert_eq!(estimate_simple_aggregation_tokens(0), 300);
        assert_eq!(estimate_simple_aggregation_tokens(4), 400);
    }

    #[test]
    fn grouped_aggregation_formula() {
        assert_eq!(estimate_grouped_aggregation_tokens(0, 3), 300);
        assert_eq!(estimate_grouped_aggregation_tokens(10, 2), 300 + 10 * 52);
    }

    #[test]
    fn record_mode_formula_applies_nested_factor_and_cap() {
        let flat = estimate_record_mode_tokens(10, 10, false);
        assert_eq!(flat, 250 + 10 * 100);
        let nested = estimate_record_mode_tokens(10, 10, true);
        assert_eq!(nested, 250 + (10.0 * 150.0) as u64);
    }

    fn group(key: &str) -> GroupResult {
        GroupResult { group_key: key.to_string(), values: HashMap::new() }
    }

    #[test]
    fn summary_drops_all_groups() {
        let (shaped, remaining) = shape_groups(vec![group("a"), group("b")], DetailLevel::Summary, 100);
        assert!(shaped.is_empty());
        assert!(remaining.is_none());
    }

    #[test]
    fn top_n_truncates_and_reports_remainder() {
        let groups: Vec<_> = (0..5).map(|i| group(&i.to_string())).collect();
        let (shaped, remaining) = shape_groups(groups, DetailLevel::TopN, 2);
        assert_eq!(shaped.len(), 2);
        assert_eq!(remaining, Some(3));
    }

    #[test]
    fn recommend_steps_down_one_level_at_a_time() {
        assert_eq!(recommend_detail_level(20_000, 10_000, DetailLevel::Full), DetailLevel::TopN);
        assert_eq!(recommend_detail_level(20_000, 10_000, DetailLevel::TopN), DetailLevel::Summary);
        assert_eq!(recommend_detail_level(5_000, 10_000, DetailLevel::Full), DetailLevel::Full);
    }
}
