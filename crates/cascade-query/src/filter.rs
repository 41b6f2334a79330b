//! Filter translation: splits caller conditions into what the sink's native
//! filter algebra can evaluate and what must be applied in-application after
//! scrolling (spec §4.9).

use cascade_qdrant::{is_indexed_field, FilterCondition, ScalarValue, SinkFilter};
use serde_json::Value as JsonValue;

/// Comparison operator on one filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
}

/// One `(field, op, value)` filter condition.
#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: JsonValue,
}

impl Condition {
    #[must_use]
    pub fn new(field: impl Into<String>, op: Op, value: JsonValue) -> Self {
        Self { field: field.into(), op, value }
    }
}

/// Business-data boolean fields the sink does not index but that are still
/// accepted for equality filtering, evaluated in-application after scroll.
pub const BOOLEAN_ESCAPE_FIELDS: &[&str] = &["active", "is_company", "is_deleted"];

fn looks_like_date_range(op: Op) -> bool {
    matches!(op, Op::Gt | Op::Gte | Op::Lt | Op::Lte)
}

/// Single-hop dot-notation: `fk_field.target_field`. Returns `None` for a
/// plain field name and `Some(Err(field))` for a multi-hop reference, which
/// is rejected outright.
fn parse_dot_notation(field: &str) -> Result<Option<(&str, &str)>, &str> {
    let Some((fk_field, rest)) = field.split_once('.') else { return Ok(None) };
    if rest.contains('.') {
        return Err(field);
    }
    Ok(Some((fk_field, rest)))
}

/// Where a condition's evaluation happens.
#[derive(Debug, Clone)]
enum Placement {
    /// Pushed into the sink's native filter algebra.
    Sink,
    /// Evaluated in-application, directly against the scrolled payload.
    InApp,
    /// Evaluated in-application against a link-resolved target field.
    DotNotation { fk_field: String, target_field: String },
}

/// Output of [`plan`]: conditions split by where they're evaluated.
#[derive(Debug, Clone, Default)]
pub struct PlannedFilter {
    pub sink: SinkFilter,
    pub post_scroll: Vec<Condition>,
    /// `(condition_index_into_post_scroll, fk_field, target_field)` for
    /// conditions that need link resolution before they can be evaluated.
    pub dot_notation: Vec<(usize, String, String)>,
}

/// Rejects filters referencing a field that is neither a system/indexed
/// field, nor a known unindexed escape field, nor single-hop dot-notation,
/// returning every offending field name.
pub fn plan(conditions: &[Condition]) -> Result<PlannedFilter, Vec<String>> {
    let mut offenders = Vec::new();
    let mut sink = SinkFilter::new();
    let mut post_scroll = Vec::new();
    let mut dot_notation = Vec::new();

    for condition in conditions {
        match parse_dot_notation(&condition.field) {
            Err(bad) => {
                offenders.push(bad.to_string());
                continue;
            }
            Ok(Some((fk_field, target_field))) => {
                dot_notation.push((post_scroll.len(), fk_field.to_string(), target_field.to_string()));
                post_scroll.push(condition.clone());
                continue;
            }
            Ok(None) => {}
        }

        let indexed = is_indexed_field(&condition.field);
        let boolean_escape = !indexed && BOOLEAN_ESCAPE_FIELDS.contains(&condition.field.as_str()) && condition.op == Op::Eq && condition.value.is_boolean();
        let date_escape = !indexed && looks_like_date_range(condition.op);

        if !indexed && !boolean_escape && !date_escape {
            offenders.push(condition.field.clone());
            continue;
        }

        let always_in_app = matches!(condition.op, Op::Neq | Op::Contains);
        if indexed && !always_in_app {
            match sink_condition(condition) {
                Some(native) => sink = sink.with(native),
                None => post_scroll.push(condition.clone()),
            }
        } else {
            post_scroll.push(condition.clone());
        }
    }

    if !offenders.is_empty() {
        return Err(offenders);
    }
    Ok(PlannedFilter { sink, post_scroll, dot_notation })
}

fn sink_condition(condition: &Condition) -> Option<FilterCondition> {
    match condition.op {
        Op::Eq => json_to_scalar(&condition.value).map(|value| FilterCondition::Equals { field: condition.field.clone(), value }),
        Op::In => {
            let values = condition.value.as_array()?.iter().filter_map(json_to_scalar).collect::<Vec<_>>();
            Some(FilterCondition::AnyOf { field: condition.field.clone(), values })
        }
        Op::Gt | Op::Gte => Some(FilterCondition::Range { field: condition.field.clone(), gte: condition.value.as_f64(), lte: None }),
        Op::Lt | Op::Lte => Some(FilterCondition::Range { field: condition.field.clone(), gte: None, lte: condition.value.as_f64() }),
        Op::Neq | Op::Contains => None,
    }
}

fn json_to_scalar(value: &JsonValue) -> Option<ScalarValue> {
    if let Some(s) = value.as_str() {
        Some(ScalarValue::Str(s.to_string()))
    } else if let Some(i) = value.as_i64() {
        Some(ScalarValue::Int(i))
    } else {
        value.as_bool().map(ScalarValue::Bool)
    }
}

/// Evaluates one in-application condition against a scrolled record's
/// payload (or, for dot-notation conditions, a resolved target value).
#[must_use]
pub fn matches(value: &JsonValue, op: Op, expected: &JsonValue) -> bool {
    match op {
        Op::Eq => value == expected,
        Op::Neq => value != expected,
        Op::Gt => compare(value, expected).is_some_and(|o| o.is_gt()),
        Op::Gte => compare(value, expected).is_some_and(|o| o.is_ge()),
        Op::Lt => compare(value, expected).is_some_and(|o| o.is_lt()),
        Op::Lte => compare(value, expected).is_some_and(|o| o.is_le()),
        Op::In => expected.as_array().is_some_and(|arr| arr.contains(value)),
        Op::Contains => value.as_str().zip(expected.as_str()).is_some_and(|(v, e)| v.contains(e)),
    }
}

fn compare(a: &JsonValue, b: &JsonValue) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b);
    }
    a.as_str()?.partial_cmp(b.as_str()?).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn indexed_equality_is_pushed_to_the_sink() {
        let planned = plan(&[Condition::new("model_name", Op::Eq, json!("crm.lead"))]).unwrap();
        assert!(!planned.sink.is_empty());
        assert!(planned.post_scroll.is_empty());
    }

    #[test]
    fn unindexed_field_with_no_escape_is_rejected() {
        let err = plan(&[Condition::new("custom_score", Op::Eq, json!(1))]).unwrap_err();
        assert_eq!(err, vec!["custom_score".to_string()]);
    }

    #[test]
    fn unindexed_date_range_is_applied_in_app() {
        let planned = plan(&[Condition::new("create_date", Op::Gte, json!("2026-01-01"))]).unwrap();
        assert!(planned.sink.is_empty());
        assert_eq!(planned.post_scroll.len(), 1);
    }

    #[test]
    fn unindexed_boolean_escape_is_applied_in_app() {
        let planned = plan(&[Condition::new("active", Op::Eq, json!(true))]).unwrap();
        assert!(planned.sink.is_empty());
        assert_eq!(planned.post_scroll.len(), 1);
    }

    #[test]
    fn single_hop_dot_notation_is_accepted_and_deferred() {
        let planned = plan(&[Condition::new("partner_id.name", Op::Eq, json!("Acme"))]).unwrap();
        assert_eq!(planned.dot_notation.len(), 1);
        assert_eq!(planned.dot_notation[0].1, "partner_id");
        assert_eq!(planned.dot_notation[0].2, "name");
    }

    #[test]
    fn multi_hop_dot_notation_is_rejected() {
        let err = plan(&[Condition::new("partner_id.company_id.name", Op::Eq, json!("Acme"))]).unwrap_err();
        assert_eq!(err, vec!["partner_id.company_id.name".to_string()]);
    }

    #[test]
    fn neq_on_an_indexed_field_is_still_applied_in_app() {
        let planned = plan(&[Condition::new("model_name", Op::Neq, json!("crm.lead"))]).unwrap();
        assert!(planned.sink.is_empty());
        assert_eq!(planned.post_scroll.len(), 1);
    }
}
