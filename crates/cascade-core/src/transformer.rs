//! Maps one raw upstream record into a `vector_text` and a payload (spec §4.3).
//!
//! Pure function of `(record, registry, restricted set, pattern)` — no I/O,
//! no retries, nothing fallible. Field-access problems are the extractor's
//! concern; by the time a record reaches this module every restricted field
//! is already known and gets rendered as a sentinel.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::error::RestrictionReason;
use crate::ids::{self, PointId, RelationKind};
use crate::pattern::{Pattern, UnknownFormatterWarning};
use crate::payload::PayloadValue;
use crate::schema::{Field, FieldType, Model, SchemaRegistry};

/// Sentinel written in place of a restricted field's value.
const SENTINEL_API: &str = "Restricted_from_API";
/// Sentinel written when the restriction was raised upstream-side.
const SENTINEL_UPSTREAM: &str = "Restricted_odoo_error";

fn sentinel_for(reason: RestrictionReason) -> &'static str {
    match reason {
        RestrictionReason::UpstreamError => SENTINEL_UPSTREAM,
        _ => SENTINEL_API,
    }
}

/// The set of fields restricted for the remainder of a sync run, carried
/// explicitly through the call rather than captured in a closure (spec §9,
/// "Retry-on-field-error with side-channel callback").
#[derive(Debug, Clone, Default)]
pub struct RestrictedFields(HashMap<String, RestrictionReason>);

impl RestrictedFields {
    /// An empty restricted set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `field` as restricted for `reason`.
    pub fn insert(&mut self, field: impl Into<String>, reason: RestrictionReason) {
        self.0.insert(field.into(), reason);
    }

    /// Whether `field` has been restricted in this run.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// The restriction reason for `field`, if any.
    #[must_use]
    pub fn reason(&self, field: &str) -> Option<RestrictionReason> {
        self.0.get(field).copied()
    }
}

/// The result of transforming one raw record.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// Text to embed.
    pub vector_text: String,
    /// Payload-enabled fields, empty/null fields omitted.
    pub fields: HashMap<String, PayloadValue>,
    /// One graph-namespace id per FK field that had a non-null value.
    pub graph_refs: Vec<PointId>,
    /// Unknown-formatter fallbacks encountered while rendering the pattern.
    pub warnings: Vec<UnknownFormatterWarning>,
}

fn is_blank(value: Option<&JsonValue>) -> bool {
    match value {
        None => true,
        Some(JsonValue::Null) => true,
        Some(JsonValue::Array(a)) => a.is_empty(),
        Some(JsonValue::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn single_fk_ids(field: &Field, value: &JsonValue) -> Option<i64> {
    if !matches!(field.field_type, FieldType::ReferenceSingle) {
        return None;
    }
    value.as_i64().or_else(|| value.as_array().and_then(|a| a.first()).and_then(JsonValue::as_i64))
}

fn multi_fk_ids(value: &JsonValue) -> Vec<i64> {
    value
        .as_array()
        .map(|arr| arr.iter().filter_map(JsonValue::as_i64).collect())
        .unwrap_or_default()
}

fn relation_kind(field_type: FieldType) -> Option<RelationKind> {
    match field_type {
        FieldType::ReferenceSingle => Some(RelationKind::Single),
        FieldType::ReferenceMulti => Some(RelationKind::Multi),
        FieldType::ReferenceReverse => Some(RelationKind::Reverse),
        _ => None,
    }
}

/// Transforms `raw` (an upstream record keyed by field name) into vector
/// text and a flat payload, per spec §4.3.
///
/// `registry` resolves FK target model ids; `restricted` carries the set of
/// fields this run has already learned are unreadable; `pattern` is the
/// model's narrative template, if one has been registered.
#[must_use]
pub fn transform(
    raw: &HashMap<String, JsonValue>,
    model: &Model,
    registry: &SchemaRegistry,
    restricted: &RestrictedFields,
    pattern: Option<&Pattern>,
) -> TransformOutput {
    let mut fields = HashMap::new();
    let mut graph_refs = Vec::new();
    let mut warnings = Vec::new();

    for field in &model.fields {
        if !field.payload_enabled {
            continue;
        }
        if restricted.contains(&field.name) {
            let sentinel = sentinel_for(restricted.reason(&field.name).unwrap_or(RestrictionReason::Unknown));
            fields.insert(field.name.clone(), PayloadValue::Scalar(JsonValue::String(sentinel.to_string())));
            continue;
        }
        let raw_value = raw.get(&field.name);
        if is_blank(raw_value) {
            continue;
        }
        let raw_value = raw_value.unwrap();

        if field.is_fk() {
            let target_model_id = field
                .fk_target_model_id
                .or_else(|| field.fk_target_model.as_deref().and_then(|m| registry.model_id(m)));
            let Some(target_model_id) = target_model_id else {
                continue;
            };
            match field.field_type {
                FieldType::ReferenceSingle => {
                    if let Some(raw_id) = single_fk_ids(field, raw_value) {
                        let qdrant = ids::data_id(target_model_id, raw_id as u64);
                        fields.insert(field.name.clone(), PayloadValue::SingleRef { raw: raw_id, qdrant });
                        if let Some(kind) = relation_kind(field.field_type) {
                            graph_refs.push(ids::graph_id(model.id, target_model_id, kind, field.id));
                        }
                    }
                }
                FieldType::ReferenceMulti | FieldType::ReferenceReverse => {
                    let raw_ids = multi_fk_ids(raw_value);
                    if !raw_ids.is_empty() {
                        let qdrant: Vec<PointId> =
                            raw_ids.iter().map(|id| ids::data_id(target_model_id, *id as u64)).collect();
                        fields.insert(
                            field.name.clone(),
                            PayloadValue::MultiRef { raw: raw_ids, qdrant },
                        );
                        if let Some(kind) = relation_kind(field.field_type) {
                            graph_refs.push(ids::graph_id(model.id, target_model_id, kind, field.id));
                        }
                    }
                }
                _ => unreachable!("is_fk() implies a reference field type"),
            }
        } else if let FieldType::Json = field.field_type {
            fields.insert(field.name.clone(), PayloadValue::Scalar(raw_value.clone()));
        } else {
            fields.insert(field.name.clone(), PayloadValue::Scalar(raw_value.clone()));
        }
    }

    let (vector_text, pattern_warnings) = render_vector_text(raw, model, restricted, pattern);
    warnings.extend(pattern_warnings);

    TransformOutput { vector_text, fields, graph_refs, warnings }
}

fn render_vector_text(
    raw: &HashMap<String, JsonValue>,
    model: &Model,
    restricted: &RestrictedFields,
    pattern: Option<&Pattern>,
) -> (String, Vec<UnknownFormatterWarning>) {
    let sentinel_value = |name: &str| -> Option<JsonValue> {
        restricted.reason(name).map(|reason| JsonValue::String(sentinel_for(reason).to_string()))
    };

    if let Some(pattern) = pattern {
        let resolved: HashMap<String, JsonValue> = model
            .fields
            .iter()
            .map(|f| f.name.clone())
            .chain(pattern.referenced_fields().iter().map(|s| s.to_string()))
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .filter_map(|name| {
                sentinel_value(&name).or_else(|| raw.get(&name).cloned()).map(|v| (name, v))
            })
            .collect();
        let (mut text, warnings) = pattern.render(|name| resolved.get(name));

        let referenced: std::collections::HashSet<&str> = pattern.referenced_fields().into_iter().collect();
        let appendix = dynamic_appendix(raw, model, restricted, &referenced);
        if !appendix.is_empty() {
            if !text.is_empty() {
                text.push_str(" | ");
            }
            text.push_str(&appendix);
        }
        (text, warnings)
    } else {
        (deterministic_fallback(raw, model, restricted), Vec::new())
    }
}

fn dynamic_appendix(
    raw: &HashMap<String, JsonValue>,
    model: &Model,
    restricted: &RestrictedFields,
    already_referenced: &std::collections::HashSet<&str>,
) -> String {
    model
        .fields
        .iter()
        .filter(|f| f.payload_enabled && !already_referenced.contains(f.name.as_str()))
        .filter_map(|f| field_label_value(raw, f, restricted))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn deterministic_fallback(raw: &HashMap<String, JsonValue>, model: &Model, restricted: &RestrictedFields) -> String {
    model
        .fields
        .iter()
        .filter(|f| f.payload_enabled)
        .filter_map(|f| field_label_value(raw, f, restricted))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn field_label_value(raw: &HashMap<String, JsonValue>, field: &Field, restricted: &RestrictedFields) -> Option<String> {
    if restricted.contains(&field.name) {
        let sentinel = sentinel_for(restricted.reason(&field.name).unwrap_or(RestrictionReason::Unknown));
        return Some(format!("{}: {}", field.label, sentinel));
    }
    let value = raw.get(&field.name)?;
    if is_blank(Some(value)) {
        return None;
    }
    let formatted = crate::pattern::Formatter::Default.apply(value);
    Some(format!("{}: {}", field.label, formatted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Model;
    use serde_json::json;
    use std::collections::HashSet;

    fn lead_model() -> Model {
        Model {
            name: "lead".to_string(),
            id: 344,
            fields: vec![
                Field {
                    id: 1,
                    name: "name".to_string(),
                    label: "Opportunity".to_string(),
                    field_type: FieldType::String,
                    is_derived: false,
                    payload_enabled: true,
                    fk_target_model: None,
                    fk_target_model_id: None,
                },
                Field {
                    id: 2,
                    name: "partner_id".to_string(),
                    label: "Customer".to_string(),
                    field_type: FieldType::ReferenceSingle,
                    is_derived: false,
                    payload_enabled: true,
                    fk_target_model: Some("partner".to_string()),
                    fk_target_model_id: Some(78),
                },
                Field {
                    id: 3,
                    name: "tag_ids".to_string(),
                    label: "Tags".to_string(),
                    field_type: FieldType::ReferenceMulti,
                    is_derived: false,
                    payload_enabled: true,
                    fk_target_model: Some("tag".to_string()),
                    fk_target_model_id: Some(99),
                },
                Field {
                    id: 4,
                    name: "expected_revenue".to_string(),
                    label: "Expected Revenue".to_string(),
                    field_type: FieldType::Number,
                    is_derived: false,
                    payload_enabled: true,
                    fk_target_model: None,
                    fk_target_model_id: None,
                },
            ],
        }
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(vec![lead_model()], HashSet::new())
    }

    #[test]
    fn single_fk_emits_raw_and_qdrant_siblings_and_a_graph_ref() {
        let model = lead_model();
        let reg = registry();
        let mut raw = HashMap::new();
        raw.insert("name".to_string(), json!("Acme deal"));
        raw.insert("partner_id".to_string(), json!(41085));
        raw.insert("expected_revenue".to_string(), json!(5000.0));

        let out = transform(&raw, &model, &reg, &RestrictedFields::new(), None);
        match out.fields.get("partner_id").unwrap() {
            PayloadValue::SingleRef { raw, qdrant } => {
                assert_eq!(*raw, 41085);
                assert_eq!(*qdrant, ids::data_id(78, 41085));
            }
            other => panic!("expected SingleRef, got {other:?}"),
        }
        assert_eq!(out.graph_refs.len(), 1);
    }

    #[test]
    fn multi_fk_emits_parallel_lists() {
        let model = lead_model();
        let reg = registry();
        let mut raw = HashMap::new();
        raw.insert("name".to_string(), json!("Acme deal"));
        raw.insert("tag_ids".to_string(), json!([1, 2, 3]));

        let out = transform(&raw, &model, &reg, &RestrictedFields::new(), None);
        match out.fields.get("tag_ids").unwrap() {
            PayloadValue::MultiRef { raw, qdrant } => {
                assert_eq!(raw, &vec![1, 2, 3]);
                assert_eq!(qdrant.len(), 3);
            }
            other => panic!("expected MultiRef, got {other:?}"),
        }
    }

    #[test]
    fn null_and_missing_fields_are_omitted() {
        let model = lead_model();
        let reg = registry();
        let mut raw = HashMap::new();
        raw.insert("name".to_string(), json!("Acme deal"));
        raw.insert("partner_id".to_string(), JsonValue::Null);

        let out = transform(&raw, &model, &reg, &RestrictedFields::new(), None);
        assert!(!out.fields.contains_key("partner_id"));
        assert!(!out.fields.contains_key("expected_revenue"));
    }

    #[test]
    fn restricted_field_writes_sentinel_in_payload_and_text() {
        let model = lead_model();
        let reg = registry();
        let mut raw = HashMap::new();
        raw.insert("name".to_string(), json!("Acme deal"));
        raw.insert("expected_revenue".to_string(), json!(5000.0));
        let mut restricted = RestrictedFields::new();
        restricted.insert("expected_revenue", RestrictionReason::SecurityRestriction);

        let out = transform(&raw, &model, &reg, &restricted, None);
        assert_eq!(
            out.fields.get("expected_revenue"),
            Some(&PayloadValue::Scalar(json!("Restricted_from_API")))
        );
        assert!(out.vector_text.contains("Restricted_from_API"));
    }

    #[test]
    fn upstream_side_restriction_uses_odoo_sentinel() {
        let model = lead_model();
        let reg = registry();
        let raw = HashMap::new();
        let mut restricted = RestrictedFields::new();
        restricted.insert("expected_revenue", RestrictionReason::UpstreamError);

        let out = transform(&raw, &model, &reg, &restricted, None);
        assert_eq!(
            out.fields.get("expected_revenue"),
            Some(&PayloadValue::Scalar(json!("Restricted_odoo_error")))
        );
    }

    #[test]
    fn falls_back_to_deterministic_concatenation_without_a_pattern() {
        let model = lead_model();
        let reg = registry();
        let mut raw = HashMap::new();
        raw.insert("name".to_string(), json!("Acme deal"));
        raw.insert("expected_revenue".to_string(), json!(5000));

        let out = transform(&raw, &model, &reg, &RestrictedFields::new(), None);
        assert!(out.vector_text.starts_with("Opportunity: Acme deal"));
        assert!(out.vector_text.contains("Expected Revenue: 5000"));
    }

    #[test]
    fn pattern_appends_dynamic_appendix_of_unreferenced_fields() {
        let model = lead_model();
        let reg = registry();
        let mut raw = HashMap::new();
        raw.insert("name".to_string(), json!("Acme deal"));
        raw.insert("expected_revenue".to_string(), json!(5000));
        let pattern = Pattern::parse("Deal: {name}");

        let out = transform(&raw, &model, &reg, &RestrictedFields::new(), Some(&pattern));
        assert!(out.vector_text.starts_with("Deal: Acme deal"));
        assert!(out.vector_text.contains("Expected Revenue: 5000"));
    }
}
