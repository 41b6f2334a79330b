//! Streaming aggregation engine (spec §4.9, "Aggregation engine").
//!
//! Each scrolled record is folded into per-alias running sums, counts,
//! mins and maxes exactly once; nothing is buffered beyond the per-group
//! accumulator state, so this scales with the number of distinct groups,
//! not the number of records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// One `(field, op, alias)` aggregation request.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub field: String,
    pub op: AggOp,
    pub alias: String,
}

/// Supported aggregation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

/// Running state for one alias within one group.
#[derive(Debug, Clone, Default)]
struct AliasState {
    sum: f64,
    count: u64,
    min: Option<f64>,
    max: Option<f64>,
}

impl AliasState {
    fn observe(&mut self, value: Option<f64>) {
        self.count += 1;
        let Some(value) = value else { return };
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn result(&self, op: AggOp) -> f64 {
        match op {
            AggOp::Sum => self.sum,
            AggOp::Count => self.count as f64,
            AggOp::Avg => {
                if self.count == 0 {
                    0.0
                } else {
                    self.sum / self.count as f64
                }
            }
            AggOp::Min => self.min.unwrap_or(0.0),
            AggOp::Max => self.max.unwrap_or(0.0),
        }
    }
}

/// One group's output: the stringified group key (empty when there is no
/// `group_by`) and the per-alias results.
#[derive(Debug, Clone)]
pub struct GroupResult {
    pub group_key: String,
    pub values: HashMap<String, f64>,
}

/// Reference checksum over the aggregation's totals (spec §4.9): a short,
/// human-readable derivation, not a cryptographic digest.
#[derive(Debug, Clone)]
pub struct ReconciliationChecksum {
    pub grand_total: f64,
    pub record_count: u64,
    pub aggregation_field: String,
    pub aggregation_op: String,
    pub hash: String,
    pub computed_at: DateTime<Utc>,
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Streaming accumulator: feed it records one at a time via [`Aggregator::observe`],
/// then read out [`Aggregator::finish`].
pub struct Aggregator {
    aggregations: Vec<Aggregation>,
    group_by: Vec<String>,
    groups: HashMap<String, HashMap<String, AliasState>>,
    grand_total: HashMap<String, AliasState>,
    record_count: u64,
}

fn group_key(record: &JsonValue, group_by: &[String]) -> String {
    if group_by.is_empty() {
        return String::new();
    }
    group_by
        .iter()
        .map(|field| record.get(field).map_or_else(|| "null".to_string(), value_to_key))
        .collect::<Vec<_>>()
        .join("\u{1}")
}

fn value_to_key(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field_as_f64(record: &JsonValue, field: &str) -> Option<f64> {
    record.get(field).and_then(JsonValue::as_f64)
}

impl Aggregator {
    #[must_use]
    pub fn new(aggregations: Vec<Aggregation>, group_by: Vec<String>) -> Self {
        Self { aggregations, group_by, groups: HashMap::new(), grand_total: HashMap::new(), record_count: 0 }
    }

    /// Folds one scrolled record's payload into the running state.
    pub fn observe(&mut self, record: &JsonValue) {
        self.record_count += 1;
        let key = group_key(record, &self.group_by);
        let group = self.groups.entry(key).or_default();
        for agg in &self.aggregations {
            let value = field_as_f64(record, &agg.field);
            group.entry(agg.alias.clone()).or_default().observe(value);
            self.grand_total.entry(agg.alias.clone()).or_default().observe(value);
        }
    }

    /// Produces per-group outputs (ordered by group key) and the
    /// reconciliation checksum over the primary (first) aggregation.
    #[must_use]
    pub fn finish(self, now: DateTime<Utc>) -> (Vec<GroupResult>, ReconciliationChecksum) {
        let primary_alias = self.aggregations.first().map(|a| a.alias.clone());

        let mut groups: Vec<GroupResult> = self
            .groups
            .into_iter()
            .map(|(group_key, states)| {
                let values = states
                    .into_iter()
                    .map(|(alias, state)| {
                        let op = self.aggregations.iter().find(|a| a.alias == alias).map_or(AggOp::Count, |a| a.op);
                        (alias, state.result(op))
                    })
                    .collect();
                GroupResult { group_key, values }
            })
            .collect();

        // Spec §4.9/scenario 6: `top_n` must return the N largest groups by
        // the primary aggregation, so the full set is kept sorted that way
        // (descending, ties broken by group key for determinism) rather than
        // lexicographically by key.
        match &primary_alias {
            Some(alias) => groups.sort_by(|a, b| {
                let a_value = a.values.get(alias).copied().unwrap_or(0.0);
                let b_value = b.values.get(alias).copied().unwrap_or(0.0);
                b_value.partial_cmp(&a_value).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.group_key.cmp(&b.group_key))
            }),
            None => groups.sort_by(|a, b| a.group_key.cmp(&b.group_key)),
        }

        let primary = self.aggregations.first();
        let (grand_total, aggregation_field, aggregation_op) = match primary {
            Some(agg) => {
                let state = self.grand_total.get(&agg.alias).cloned().unwrap_or_default();
                (state.result(agg.op), agg.field.clone(), format!("{:?}", agg.op).to_lowercase())
            }
            None => (self.record_count as f64, String::new(), "count".to_string()),
        };

        let hash_input = (grand_total * 1000.0 + self.record_count as f64).round().abs() as u64;
        let checksum = ReconciliationChecksum {
            grand_total,
            record_count: self.record_count,
            aggregation_field,
            aggregation_op,
            hash: to_base36(hash_input),
            computed_at: now,
        };
        (groups, checksum)
    }
}
