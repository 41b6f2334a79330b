//! Payload shapes carried by points in the single logical collection.
//!
//! The on-wire payload is discriminated by a `point_type` string field
//! (spec §3); in memory that discrimination is enforced by the type system
//! via [`Point`], a tagged union over the three payload shapes this
//! specification touches (schema points are out of scope for sync/query
//! but modeled here for completeness of the registry sync contract).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::ids::PointId;
use crate::schema::FieldType;

/// Bound on the `cascade_sources` ring buffer (spec §3).
pub const CASCADE_SOURCES_CAP: usize = 100;
/// Bound on `validation_history` (spec §4.7).
pub const VALIDATION_HISTORY_CAP: usize = 10;
/// Bound on orphan samples attached to an edge (spec §4.8).
pub const ORPHAN_SAMPLE_CAP: usize = 10;

/// A value in a data point's projected payload: either a scalar/JSON value,
/// or (for FK fields) the raw id plus the resolved data-namespace identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    /// Non-reference scalar or JSON value.
    Scalar(JsonValue),
    /// `reference-single` field: raw upstream id plus resolved point id.
    SingleRef {
        /// Raw foreign-key id as stored upstream.
        raw: i64,
        /// Data-namespace point id of the referenced record (`<field>_qdrant`).
        qdrant: PointId,
    },
    /// `reference-multi` field: parallel lists of raw ids and resolved point ids.
    MultiRef {
        /// Raw foreign-key ids.
        raw: Vec<i64>,
        /// Data-namespace point ids, same order as `raw`.
        qdrant: Vec<PointId>,
    },
}

/// Payload of a `point_type=data` point (spec §3, "Data point payload").
///
/// Serializes flat: projected fields land as top-level `<field>` keys
/// rather than nested under a `fields` object, with single/multi FK
/// fields additionally emitting a `<field>_qdrant` sibling (spec §3).
/// [`DataPointPayload::fields`] is the in-memory grouping only; see the
/// hand-written `Serialize`/`Deserialize` impls below.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPointPayload {
    /// Owning model's technical name.
    pub model_name: String,
    /// Owning model's numeric id.
    pub model_id: u16,
    /// Upstream record id.
    pub record_id: u64,
    /// When this point was last written by a sync.
    pub sync_timestamp: DateTime<Utc>,
    /// Projected payload fields, keyed by field name (and `<field>_qdrant`
    /// siblings for FK fields handled via [`PayloadValue`] variants).
    pub fields: HashMap<String, PayloadValue>,
    /// The text that was embedded to produce this point's vector (kept for
    /// debugging/drilldown).
    pub vector_text: String,
    /// Graph-namespace ids of the edges this record participates in, one
    /// per FK field that had a non-null value.
    pub graph_refs: Vec<PointId>,
}

/// Core (non-projected) keys of a [`DataPointPayload`]'s wire shape; every
/// other top-level key belongs to `fields` (stripping a `_qdrant` suffix
/// when present).
const DATA_POINT_CORE_KEYS: &[&str] =
    &["model_name", "model_id", "record_id", "sync_timestamp", "vector_text", "graph_refs"];

impl Serialize for DataPointPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("model_name", &self.model_name)?;
        map.serialize_entry("model_id", &self.model_id)?;
        map.serialize_entry("record_id", &self.record_id)?;
        map.serialize_entry("sync_timestamp", &self.sync_timestamp)?;
        map.serialize_entry("vector_text", &self.vector_text)?;
        map.serialize_entry("graph_refs", &self.graph_refs)?;
        for (field, value) in &self.fields {
            match value {
                PayloadValue::Scalar(v) => map.serialize_entry(field, v)?,
                PayloadValue::SingleRef { raw, qdrant } => {
                    map.serialize_entry(field, raw)?;
                    map.serialize_entry(&format!("{field}_qdrant"), qdrant)?;
                }
                PayloadValue::MultiRef { raw, qdrant } => {
                    map.serialize_entry(field, raw)?;
                    map.serialize_entry(&format!("{field}_qdrant"), qdrant)?;
                }
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DataPointPayload {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;

        let mut map = serde_json::Map::<String, JsonValue>::deserialize(deserializer)?;

        let model_name = map
            .remove("model_name")
            .ok_or_else(|| D::Error::missing_field("model_name"))
            .and_then(|v| serde_json::from_value(v).map_err(D::Error::custom))?;
        let model_id = map
            .remove("model_id")
            .ok_or_else(|| D::Error::missing_field("model_id"))
            .and_then(|v| serde_json::from_value(v).map_err(D::Error::custom))?;
        let record_id = map
            .remove("record_id")
            .ok_or_else(|| D::Error::missing_field("record_id"))
            .and_then(|v| serde_json::from_value(v).map_err(D::Error::custom))?;
        let sync_timestamp = map
            .remove("sync_timestamp")
            .ok_or_else(|| D::Error::missing_field("sync_timestamp"))
            .and_then(|v| serde_json::from_value(v).map_err(D::Error::custom))?;
        let vector_text = map
            .remove("vector_text")
            .ok_or_else(|| D::Error::missing_field("vector_text"))
            .and_then(|v| serde_json::from_value(v).map_err(D::Error::custom))?;
        let graph_refs = map
            .remove("graph_refs")
            .ok_or_else(|| D::Error::missing_field("graph_refs"))
            .and_then(|v| serde_json::from_value(v).map_err(D::Error::custom))?;
        map.remove("point_type");

        let qdrant_keys: Vec<String> =
            map.keys().filter(|k| k.ends_with("_qdrant") && !DATA_POINT_CORE_KEYS.contains(&k.as_str())).cloned().collect();

        let mut fields = HashMap::new();
        for qdrant_key in qdrant_keys {
            let base = qdrant_key.strip_suffix("_qdrant").unwrap().to_string();
            let qdrant_value = map.remove(&qdrant_key).expect("just checked key exists");
            let Some(raw_value) = map.remove(&base) else { continue };
            let value = if raw_value.is_array() {
                let raw: Vec<i64> = serde_json::from_value(raw_value).map_err(D::Error::custom)?;
                let qdrant: Vec<PointId> = serde_json::from_value(qdrant_value).map_err(D::Error::custom)?;
                PayloadValue::MultiRef { raw, qdrant }
            } else {
                let raw: i64 = serde_json::from_value(raw_value).map_err(D::Error::custom)?;
                let qdrant: PointId = serde_json::from_value(qdrant_value).map_err(D::Error::custom)?;
                PayloadValue::SingleRef { raw, qdrant }
            };
            fields.insert(base, value);
        }
        for (key, value) in map {
            if DATA_POINT_CORE_KEYS.contains(&key.as_str()) {
                continue;
            }
            fields.insert(key, PayloadValue::Scalar(value));
        }

        Ok(DataPointPayload { model_name, model_id, record_id, sync_timestamp, fields, vector_text, graph_refs })
    }
}

/// Relation kind, re-exported here for payload construction convenience.
pub use crate::ids::RelationKind;

/// Coarse cardinality classification of an edge (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardinalityClass {
    /// `unique_targets / edge_count >= 0.95`.
    OneToOne,
    /// `>= 0.20`.
    OneToFew,
    /// Otherwise.
    OneToMany,
}

impl CardinalityClass {
    /// Classifies a ratio per the thresholds in spec §4.7.
    #[must_use]
    pub fn classify(unique_targets: u64, edge_count: u64) -> Self {
        if edge_count == 0 {
            return CardinalityClass::OneToOne;
        }
        let ratio = unique_targets as f64 / edge_count as f64;
        if ratio >= 0.95 {
            CardinalityClass::OneToOne
        } else if ratio >= 0.20 {
            CardinalityClass::OneToFew
        } else {
            CardinalityClass::OneToMany
        }
    }
}

/// Direction of the integrity score across the rolling validation history
/// window (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityTrend {
    /// Linear-regression slope over the window is `> 0.5`.
    Improving,
    /// Slope magnitude is `<= 0.5`.
    Stable,
    /// Slope is `< -0.5`.
    Degrading,
}

/// A single orphan reference sample attached to an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanSample {
    /// The source record that holds the dangling reference.
    pub source_record_id: u64,
    /// The target id that could not be found.
    pub missing_target_id: u64,
}

/// One entry in an edge's rolling validation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationHistoryEntry {
    /// When this validation ran.
    pub validated_at: DateTime<Utc>,
    /// Integrity score recorded at this validation.
    pub integrity_score: f64,
    /// Orphan count recorded at this validation.
    pub orphan_count: u64,
    /// `integrity_score - previous_entry.integrity_score`, or `None` for the first entry.
    pub delta_from_previous: Option<f64>,
}

/// Payload of a `point_type=graph` point: one FK relationship (spec §3,
/// "Graph edge payload").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdgePayload {
    /// Source model's technical name.
    pub source_model: String,
    /// Source model's numeric id.
    pub source_model_id: u16,
    /// FK field's registry id.
    pub field_id: u64,
    /// FK field's technical name.
    pub field_name: String,
    /// FK field's display label.
    pub field_label: String,
    /// `single` / `multi` / `reverse`.
    pub relation_kind: RelationKind,
    /// Target model's technical name.
    pub target_model: String,
    /// Target model's numeric id.
    pub target_model_id: u16,
    /// Whether the target model has no outgoing FKs (no edges where it is the source).
    pub is_leaf: bool,
    /// Cascade BFS depth at which this edge was first observed.
    pub depth_from_origin: u32,
    /// Total FK references observed across all syncs.
    pub edge_count: u64,
    /// Distinct target ids observed.
    pub unique_targets: u64,
    /// Timestamp of the most recent cascade write.
    pub last_cascade: Option<DateTime<Utc>>,
    /// Bounded ring of models that caused this edge to be (re-)written.
    pub cascade_sources: VecDeque<String>,
    /// Natural-language description, embedded for `SemanticSearch`.
    pub description: String,
    /// Timestamp of the most recent validation pass.
    pub last_validation: Option<DateTime<Utc>>,
    /// Orphan count recorded at the most recent validation.
    pub orphan_count: u64,
    /// `(refs - orphans) / refs * 100`, rounded to 2 decimals.
    pub validation_integrity_score: Option<f64>,
    /// Up to [`ORPHAN_SAMPLE_CAP`] orphan samples, first-encountered order.
    pub orphan_samples: Vec<OrphanSample>,
    /// Coarse cardinality classification.
    pub cardinality_class: CardinalityClass,
    /// `unique_targets / edge_count`, rounded to 3 decimals.
    pub cardinality_ratio: f64,
    /// `edge_count / unique_targets`, or 0 when there are no targets.
    pub avg_refs_per_target: f64,
    /// Rolling window of the last [`VALIDATION_HISTORY_CAP`] validation entries.
    pub validation_history: VecDeque<ValidationHistoryEntry>,
    /// Direction of the integrity score across `validation_history`.
    pub integrity_trend: Option<IntegrityTrend>,
}

impl GraphEdgePayload {
    /// Builds a brand-new edge payload at cascade-materialization time
    /// (spec §4.6 step 4). Counters start at the observed totals for the
    /// run that created it.
    #[must_use]
    pub fn new(
        source_model: impl Into<String>,
        source_model_id: u16,
        field_id: u64,
        field_name: impl Into<String>,
        field_label: impl Into<String>,
        relation_kind: RelationKind,
        target_model: impl Into<String>,
        target_model_id: u16,
        depth_from_origin: u32,
    ) -> Self {
        let source_model = source_model.into();
        let field_name = field_name.into();
        let target_model = target_model.into();
        let description = format!(
            "{source_model}.{field_name} references {target_model} ({relation_kind:?})"
        );
        Self {
            source_model,
            source_model_id,
            field_id,
            field_name,
            field_label: field_label.into(),
            relation_kind,
            target_model,
            target_model_id,
            is_leaf: false,
            depth_from_origin,
            edge_count: 0,
            unique_targets: 0,
            last_cascade: None,
            cascade_sources: VecDeque::new(),
            description,
            last_validation: None,
            orphan_count: 0,
            validation_integrity_score: None,
            orphan_samples: Vec::new(),
            cardinality_class: CardinalityClass::OneToOne,
            cardinality_ratio: 0.0,
            avg_refs_per_target: 0.0,
            validation_history: VecDeque::new(),
            integrity_trend: None,
        }
    }

    /// Appends `source` to the bounded `cascade_sources` ring, evicting the
    /// oldest entry first once the cap is reached (spec §3, "Monotone
    /// cascade_sources").
    pub fn push_cascade_source(&mut self, source: impl Into<String>) {
        if self.cascade_sources.len() >= CASCADE_SOURCES_CAP {
            self.cascade_sources.pop_front();
        }
        self.cascade_sources.push_back(source.into());
    }

    /// Merges a (partial) observation into the edge's counters: adds to
    /// `edge_count`, takes the max of `unique_targets` (spec §4.7,
    /// `UpsertRelationship`).
    pub fn merge_counters(&mut self, observed_edge_count: u64, observed_unique_targets: u64) {
        self.edge_count += observed_edge_count;
        self.unique_targets = self.unique_targets.max(observed_unique_targets);
        self.recompute_cardinality();
    }

    /// Overwrites the counters with externally-measured totals (healer's
    /// "set-absolute" mode; see spec §9 open questions).
    pub fn set_counters_absolute(&mut self, actual_edge_count: u64, actual_unique_targets: u64) {
        self.edge_count = actual_edge_count;
        self.unique_targets = actual_unique_targets;
        self.recompute_cardinality();
    }

    fn recompute_cardinality(&mut self) {
        self.cardinality_class = CardinalityClass::classify(self.unique_targets, self.edge_count);
        self.cardinality_ratio = if self.edge_count == 0 {
            0.0
        } else {
            round_to(self.unique_targets as f64 / self.edge_count as f64, 3)
        };
        self.avg_refs_per_target = if self.unique_targets == 0 {
            0.0
        } else {
            round_to(self.edge_count as f64 / self.unique_targets as f64, 3)
        };
    }

    /// Writes validation verdicts onto the edge (spec §4.7, `UpdateValidation`).
    pub fn update_validation(
        &mut self,
        validated_at: DateTime<Utc>,
        orphan_count: u64,
        total_refs: u64,
        mut samples: Vec<OrphanSample>,
    ) {
        self.last_validation = Some(validated_at);
        self.orphan_count = orphan_count;
        self.validation_integrity_score = Some(if total_refs == 0 {
            100.0
        } else {
            round_to(
                (total_refs.saturating_sub(orphan_count)) as f64 / total_refs as f64 * 100.0,
                2,
            )
        });
        samples.truncate(ORPHAN_SAMPLE_CAP);
        self.orphan_samples = samples;
    }

    /// Appends an entry to the rolling validation history (cap
    /// [`VALIDATION_HISTORY_CAP`]) and recomputes `integrity_trend` by
    /// linear-regression slope with a `+-0.5` threshold (spec §4.7).
    pub fn append_validation_history(&mut self, validated_at: DateTime<Utc>, integrity_score: f64, orphan_count: u64) {
        let delta_from_previous = self
            .validation_history
            .back()
            .map(|prev| round_to(integrity_score - prev.integrity_score, 2));
        if self.validation_history.len() >= VALIDATION_HISTORY_CAP {
            self.validation_history.pop_front();
        }
        self.validation_history.push_back(ValidationHistoryEntry {
            validated_at,
            integrity_score,
            orphan_count,
            delta_from_previous,
        });
        self.integrity_trend = Some(regression_trend(&self.validation_history));
    }
}

/// Least-squares slope of `integrity_score` over the window's entry index,
/// classified against a `+-0.5` threshold.
fn regression_trend(history: &VecDeque<ValidationHistoryEntry>) -> IntegrityTrend {
    let n = history.len();
    if n < 2 {
        return IntegrityTrend::Stable;
    }
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let ys: Vec<f64> = history.iter().map(|e| e.integrity_score).collect();
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..n {
        num += (xs[i] - mean_x) * (ys[i] - mean_y);
        den += (xs[i] - mean_x).powi(2);
    }
    let slope = if den == 0.0 { 0.0 } else { num / den };
    if slope > 0.5 {
        IntegrityTrend::Improving
    } else if slope < -0.5 {
        IntegrityTrend::Degrading
    } else {
        IntegrityTrend::Stable
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Payload of a `point_type=schema` point: one registered field (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaPointPayload {
    /// Owning model's technical name.
    pub model_name: String,
    /// Owning model's numeric id.
    pub model_id: u16,
    /// Field's technical name.
    pub field_name: String,
    /// Field's display label.
    pub field_label: String,
    /// Field's declared type.
    pub field_type: FieldType,
    /// Whether the field is payload-enabled.
    pub payload_enabled: bool,
}

/// A tagged union over the payload shapes this specification touches. The
/// `point_type` wire field is derived from the active variant, never stored
/// redundantly in memory (spec §9, "Untagged payloads discriminated by a
/// string field").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "point_type", rename_all = "snake_case")]
pub enum Point {
    /// A schema registry entry.
    Schema(SchemaPointPayload),
    /// A synced business record.
    Data(DataPointPayload),
    /// A graph edge.
    Graph(GraphEdgePayload),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn cascade_sources_evicts_oldest_first() {
        let mut edge = GraphEdgePayload::new(
            "lead", 344, 1, "partner_id", "Customer", RelationKind::Single, "partner", 78, 0,
        );
        for i in 0..(CASCADE_SOURCES_CAP + 5) {
            edge.push_cascade_source(format!("run-{i}"));
        }
        assert_eq!(edge.cascade_sources.len(), CASCADE_SOURCES_CAP);
        assert_eq!(edge.cascade_sources.front().unwrap(), "run-5");
        assert_eq!(edge.cascade_sources.back().unwrap(), &format!("run-{}", CASCADE_SOURCES_CAP + 4));
    }

    #[test]
    fn merge_counters_adds_edge_count_and_maxes_unique_targets() {
        let mut edge = GraphEdgePayload::new(
            "lead", 344, 1, "partner_id", "Customer", RelationKind::Single, "partner", 78, 0,
        );
        edge.merge_counters(10, 3);
        edge.merge_counters(5, 7);
        assert_eq!(edge.edge_count, 15);
        assert_eq!(edge.unique_targets, 7);
    }

    #[test]
    fn cardinality_classification_thresholds() {
        assert_eq!(CardinalityClass::classify(95, 100), CardinalityClass::OneToOne);
        assert_eq!(CardinalityClass::classify(20, 100), CardinalityClass::OneToFew);
        assert_eq!(CardinalityClass::classify(5, 100), CardinalityClass::OneToMany);
    }

    #[test]
    fn validation_history_is_bounded_and_tracks_trend() {
        let mut edge = GraphEdgePayload::new(
            "lead", 344, 1, "partner_id", "Customer", RelationKind::Single, "partner", 78, 0,
        );
        for (i, score) in [60.0, 65.0, 70.0, 75.0, 80.0].into_iter().enumerate() {
            edge.append_validation_history(ts(2024, 1, 1 + i as u32), score, 0);
        }
        assert_eq!(edge.validation_history.len(), 5);
        assert_eq!(edge.integrity_trend, Some(IntegrityTrend::Improving));

        for i in 5..(VALIDATION_HISTORY_CAP + 3) {
            edge.append_validation_history(ts(2024, 2, 1), 80.0, 0);
            let _ = i;
        }
        assert_eq!(edge.validation_history.len(), VALIDATION_HISTORY_CAP);
        assert_eq!(edge.integrity_trend, Some(IntegrityTrend::Stable));
    }

    #[test]
    fn orphan_samples_are_truncated_to_cap() {
        let mut edge = GraphEdgePayload::new(
            "lead", 344, 1, "partner_id", "Customer", RelationKind::Single, "partner", 78, 0,
        );
        let samples: Vec<_> = (0..20)
            .map(|i| OrphanSample { source_record_id: i, missing_target_id: i })
            .collect();
        edge.update_validation(ts(2024, 1, 1), 20, 100, samples);
        assert_eq!(edge.orphan_samples.len(), ORPHAN_SAMPLE_CAP);
        assert_eq!(edge.validation_integrity_score, Some(80.0));
    }

    #[test]
    fn point_serializes_with_point_type_tag() {
        let edge = GraphEdgePayload::new(
            "lead", 344, 1, "partner_id", "Customer", RelationKind::Single, "partner", 78, 0,
        );
        let point = Point::Graph(edge);
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["point_type"], "graph");
    }

    fn data_payload() -> DataPointPayload {
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), PayloadValue::Scalar(JsonValue::String("Acme".to_string())));
        fields.insert(
            "partner_id".to_string(),
            PayloadValue::SingleRef { raw: 201, qdrant: crate::ids::data_id(78, 201) },
        );
        fields.insert(
            "tag_ids".to_string(),
            PayloadValue::MultiRef { raw: vec![1, 2], qdrant: vec![crate::ids::data_id(9, 1), crate::ids::data_id(9, 2)] },
        );
        DataPointPayload {
            model_name: "crm.lead".to_string(),
            model_id: 344,
            record_id: 41085,
            sync_timestamp: ts(2024, 1, 1),
            fields,
            vector_text: "Lead: Acme".to_string(),
            graph_refs: vec![crate::ids::graph_id(344, 78, RelationKind::Single, 1)],
        }
    }

    #[test]
    fn data_point_serializes_fields_flat_with_qdrant_siblings() {
        let json = serde_json::to_value(Point::Data(data_payload())).unwrap();
        assert_eq!(json["point_type"], "data");
        assert_eq!(json["model_name"], "crm.lead");
        assert_eq!(json["record_id"], 41085);
        assert!(json.get("fields").is_none());
        assert_eq!(json["name"], "Acme");
        assert_eq!(json["partner_id"], 201);
        assert!(json["partner_id_qdrant"].is_string());
        assert_eq!(json["tag_ids"], json!([1, 2]));
        assert_eq!(json["tag_ids_qdrant"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn data_point_round_trips_through_flat_json() {
        let original = data_payload();
        let json = serde_json::to_value(Point::Data(original.clone())).unwrap();
        match serde_json::from_value::<Point>(json).unwrap() {
            Point::Data(decoded) => assert_eq!(decoded, original),
            other => panic!("expected Point::Data, got {other:?}"),
        }
    }
}
