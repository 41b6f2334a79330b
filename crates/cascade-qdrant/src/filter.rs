//! A sink-agnostic filter shape, translated to Qdrant's `Filter`/`Condition`
//! wire types only at the last moment (spec §4.5, §4.9's two escape
//! hatches: range filters and bounded-set membership on fields outside the
//! static indexed list).

use qdrant_client::qdrant::{Condition, FieldCondition, Filter, Match, Range};
use serde::{Deserialize, Serialize};

/// A scalar payload value usable in an equality or set-membership match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

/// One condition in a [`SinkFilter`]; all conditions are ANDed together.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    /// Exact match on one scalar value.
    Equals { field: String, value: ScalarValue },
    /// Match if the field equals any of a bounded set of values (the known-set
    /// escape hatch for boolean/enum-like fields outside the indexed list).
    AnyOf { field: String, values: Vec<ScalarValue> },
    /// Inclusive numeric/date range, either bound optional (the range escape
    /// hatch for date fields outside the indexed list).
    Range { field: String, gte: Option<f64>, lte: Option<f64> },
}

/// A conjunction of [`FilterCondition`]s passed to a [`crate::VectorSink`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkFilter {
    pub conditions: Vec<FilterCondition>,
}

impl SinkFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, condition: FilterCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Field names this filter touches, for index-coverage checks upstream.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        self.conditions
            .iter()
            .map(|c| match c {
                FilterCondition::Equals { field, .. }
                | FilterCondition::AnyOf { field, .. }
                | FilterCondition::Range { field, .. } => field.as_str(),
            })
            .collect()
    }

    /// Translates to a Qdrant `Filter`; `None` for an empty filter, matching
    /// every point.
    #[must_use]
    pub fn to_qdrant(&self) -> Option<Filter> {
        if self.conditions.is_empty() {
            return None;
        }
        let must: Vec<Condition> = self.conditions.iter().map(condition_to_qdrant).collect();
        Some(Filter { must, ..Default::default() })
    }
}

fn scalar_match(value: &ScalarValue) -> Match {
    use qdrant_client::qdrant::r#match::MatchValue;
    let match_value = match value {
        ScalarValue::Str(s) => MatchValue::Keyword(s.clone()),
        ScalarValue::Int(i) => MatchValue::Integer(*i),
        ScalarValue::Bool(b) => MatchValue::Boolean(*b),
    };
    Match { match_value: Some(match_value) }
}

fn condition_to_qdrant(condition: &FilterCondition) -> Condition {
    match condition {
        FilterCondition::Equals { field, value } => Condition {
            condition_one_of: Some(qdrant_client::qdrant::condition::ConditionOneOf::Field(FieldCondition {
                key: field.clone(),
                r#match: Some(scalar_match(value)),
                ..Default::default()
            })),
        },
        FilterCondition::AnyOf { field, values } => {
            use qdrant_client::qdrant::r#match::MatchValue;
            use qdrant_client::qdrant::RepeatedStrings;
            // Mixed-type AnyOf degrades to a string set; the known-set escape
            // hatch is exercised on string/boolean enum-like fields in practice.
            let all_strings: Option<Vec<String>> = values
                .iter()
                .map(|v| match v {
                    ScalarValue::Str(s) => Some(s.clone()),
                    ScalarValue::Bool(b) => Some(b.to_string()),
                    ScalarValue::Int(i) => Some(i.to_string()),
                })
                .collect();
            let match_value = MatchValue::Keywords(RepeatedStrings { strings: all_strings.unwrap_or_default() });
            Condition {
                condition_one_of: Some(qdrant_client::qdrant::condition::ConditionOneOf::Field(FieldCondition {
                    key: field.clone(),
                    r#match: Some(Match { match_value: Some(match_value) }),
                    ..Default::default()
                })),
            }
        }
        FilterCondition::Range { field, gte, lte } => Condition {
            condition_one_of: Some(qdrant_client::qdrant::condition::ConditionOneOf::Field(FieldCondition {
                key: field.clone(),
                range: Some(Range { gte: *gte, lte: *lte, gt: None, lt: None }),
                ..Default::default()
            })),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_has_no_qdrant_representation() {
        assert!(SinkFilter::new().to_qdrant().is_none());
    }

    #[test]
    fn equals_condition_round_trips_field_name() {
        let filter = SinkFilter::new().with(FilterCondition::Equals {
            field: "model_name".to_string(),
            value: ScalarValue::Str("res.partner".to_string()),
        });
        let qf = filter.to_qdrant().unwrap();
        assert_eq!(qf.must.len(), 1);
        assert_eq!(filter.fields(), vec!["model_name"]);
    }

    #[test]
    fn range_condition_carries_both_bounds() {
        let filter = SinkFilter::new().with(FilterCondition::Range {
            field: "write_date".to_string(),
            gte: Some(1.0),
            lte: Some(2.0),
        });
        let qf = filter.to_qdrant().unwrap();
        assert_eq!(qf.must.len(), 1);
    }
}
