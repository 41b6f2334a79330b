//! Graph-context, validation-status and similarity enrichment (spec §4.9):
//! bounded-cost, best-effort additions layered onto already-scrolled
//! records. Deliberately self-contained rather than reusing
//! `cascade-validator`'s healer machinery, since enrichment here must stay
//! cheap and any failure degrades to an in-record diagnostic rather than
//! failing the whole response.

use serde_json::{json, Value as JsonValue};

use cascade_core::ids::data_id;
use cascade_core::schema::FkField;
use cascade_graph::GraphStore;
use cascade_qdrant::VectorSink;

/// Caps the number of records any enrichment flag will touch per response
/// (spec §4.9, "bound cost").
pub const MAX_ENRICHED_RECORDS: usize = 10;
/// Upper bound on `similar_limit`.
pub const MAX_SIMILAR_LIMIT: u64 = 5;

fn diagnostic(key: &str, record: &mut JsonValue, message: impl Into<String>) {
    if let JsonValue::Object(obj) = record {
        obj.insert(key.to_string(), json!({"error": message.into()}));
    }
}

/// Attaches `graph_context`: the source model's outgoing edges plus an
/// incoming-reference count for the record's own id.
pub async fn enrich_graph_context(graph: &GraphStore, model: &str, records: &mut [JsonValue]) {
    let outgoing = match graph.outgoing_of(model).await {
        Ok(edges) => edges,
        Err(e) => {
            for record in records.iter_mut().take(MAX_ENRICHED_RECORDS) {
                diagnostic("graph_context", record, e.to_string());
            }
            return;
        }
    };
    let incoming = graph.incoming_of(model).await.unwrap_or_default();
    let incoming_count = incoming.len() as u64;

    let fields: Vec<String> = outgoing.iter().map(|e| e.field_name.clone()).collect();
    let targets: Vec<String> = outgoing.iter().map(|e| e.target_model.clone()).collect();

    for record in records.iter_mut().take(MAX_ENRICHED_RECORDS) {
        let context = json!({
            "outgoing_fields": fields,
            "outgoing_targets": targets,
            "incoming_reference_count": incoming_count,
        });
        if let JsonValue::Object(obj) = record {
            obj.insert("graph_context".to_string(), context);
        }
    }
}

/// Attaches `validation_status`: for each FK field on the record, whether
/// its target id exists in the sink, plus an integrity score over the
/// record's own FK fields.
pub async fn enrich_validation_status(sink: &dyn VectorSink, fk_fields: &[FkField], records: &mut [JsonValue]) {
    for record in records.iter_mut().take(MAX_ENRICHED_RECORDS) {
        let mut total = 0u64;
        let mut valid = 0u64;
        let mut orphans = Vec::new();

        for fk in fk_fields {
            let Some(raw) = record.get(&fk.field.name).and_then(JsonValue::as_i64) else { continue };
            total += 1;
            let point_id = data_id(fk.target_model_id, raw as u64);
            match sink.retrieve(&[point_id]).await {
                Ok(found) if !found.is_empty() => valid += 1,
                Ok(_) => orphans.push(fk.field.name.clone()),
                Err(e) => {
                    diagnostic("validation_status", record, e.to_string());
                    total = 0;
                    break;
                }
            }
        }

        if total == 0 {
            continue;
        }
        let score = valid as f64 / total as f64 * 100.0;
        let status = json!({
            "integrity_score": (score * 100.0).round() / 100.0,
            "orphan_fields": orphans,
        });
        if let JsonValue::Object(obj) = record {
            obj.insert("validation_status".to_string(), status);
        }
    }
}

/// Attaches `similar`: the top `k` (`<= MAX_SIMILAR_LIMIT`) nearest
/// neighbors to the record's own vector, filtered to the same model and
/// excluding the record itself.
pub async fn enrich_similar(
    sink: &dyn VectorSink,
    model: &str,
    similar_limit: u64,
    vectors: &[(usize, cascade_core::PointId, Vec<f32>)],
    records: &mut [JsonValue],
) {
    let k = similar_limit.clamp(1, MAX_SIMILAR_LIMIT);
    use cascade_qdrant::{FilterCondition, ScalarValue, SinkFilter};
    let filter = SinkFilter::new().with(FilterCondition::Equals { field: "model_name".into(), value: ScalarValue::Str(model.to_string()) });

    for (idx, self_id, vector) in vectors.iter().take(MAX_ENRICHED_RECORDS) {
        let Some(record) = records.get_mut(*idx) else { continue };
        match sink.search(vector, Some(&filter), k + 1).await {
            Ok(hits) => {
                let similar: Vec<JsonValue> = hits
                    .into_iter()
                    .filter(|(point, _)| point.id != *self_id)
                    .take(k as usize)
                    .map(|(point, score)| json!({"record_id": point.payload.get("record_id"), "score": score}))
                    .collect();
                if let JsonValue::Object(obj) = record {
                    obj.insert("similar".to_string(), JsonValue::Array(similar));
                }
            }
            Err(e) => diagnostic("similar", record, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cascade_core::schema::{Field, FieldType};
    use cascade_core::PointId;
    use cascade_embeddings::{Embedder, EmbedError, Role};
    use cascade_graph::{GraphStore, UpsertInput};
    use cascade_core::RelationKind;
    use cascade_qdrant::{IndexKind, PointRecord, ScrollPage, SinkError, SinkFilter};
    use parking_lot::Mutex;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;

    struct FakeSink {
        points: Mutex<StdHashMap<PointId, PointRecord>>,
    }

    #[async_trait]
    impl VectorSink for FakeSink {
        async fn upsert(&self, points: Vec<PointRecord>) -> Result<(), SinkError> {
            let mut store = self.points.lock();
            for point in points {
                store.insert(point.id, point);
            }
            Ok(())
        }
        async fn scroll(&self, filter: Option<&SinkFilter>, _cursor: Option<PointId>, _limit: u32) -> Result<ScrollPage, SinkError> {
            let store = self.points.lock();
            Ok(ScrollPage { records: store.values().filter(|r| matches(r, filter)).cloned().collect(), next_offset: None })
        }
        async fn retrieve(&self, ids: &[PointId]) -> Result<Vec<PointRecord>, SinkError> {
            let store = self.points.lock();
            Ok(ids.iter().filter_map(|id| store.get(id).cloned()).collect())
        }
        async fn delete_by_ids(&self, _ids: &[PointId]) -> Result<(), SinkError> {
            Ok(())
        }
        async fn delete_by_filter(&self, _filter: &SinkFilter) -> Result<(), SinkError> {
            Ok(())
        }
        async fn create_payload_index(&self, _field: &str, _kind: IndexKind) -> Result<(), SinkError> {
            Ok(())
        }
        async fn count(&self, _filter: Option<&SinkFilter>) -> Result<u64, SinkError> {
            Ok(0)
        }
        async fn search(&self, _vector: &[f32], filter: Option<&SinkFilter>, k: u64) -> Result<Vec<(PointRecord, f32)>, SinkError> {
            let store = self.points.lock();
            Ok(store.values().filter(|r| matches(r, filter)).take(k as usize).map(|r| (r.clone(), 1.0)).collect())
        }
    }

    fn matches(record: &PointRecord, filter: Option<&SinkFilter>) -> bool {
        let Some(filter) = filter else { return true };
        filter.conditions.iter().all(|c| match c {
            cascade_qdrant::FilterCondition::Equals { field, value } => {
                record.payload.get(field).map(|v| match value {
                    cascade_qdrant::ScalarValue::Str(s) => v.as_str() == Some(s.as_str()),
                    _ => true,
                }).unwrap_or(false)
            }
            _ => true,
        })
    }

    struct FakeEmbedder;
    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str, _role: Role) -> Result<Vec<f32>, EmbedError> {
            Ok(vec![text.len() as f32])
        }
        async fn embed_batch(&self, texts: &[String], role: Role) -> Result<Vec<Vec<f32>>, EmbedError> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t, role).await?);
            }
            Ok(out)
        }
        fn dimensions(&self) -> usize {
            1
        }
    }

    fn fk() -> FkField {
        FkField {
            field: Field {
                id: 1,
                name: "partner_id".to_string(),
                label: "Customer".to_string(),
                field_type: FieldType::ReferenceSingle,
                is_derived: false,
                payload_enabled: true,
                fk_target_model: Some("res.partner".to_string()),
                fk_target_model_id: Some(2),
            },
            target_model: "res.partner".to_string(),
            target_model_id: 2,
        }
    }

    #[tokio::test]
    async fn validation_status_scores_valid_and_orphan_fk() {
        use serde_json::json;
        let sink = FakeSink { points: Mutex::new(StdHashMap::new()) };
        let target_id = data_id(2, 5);
        sink.points.lock().insert(target_id, PointRecord::new(target_id, vec![], json!({"record_id": 5})));

        let mut records = vec![json!({"partner_id": 5}), json!({"partner_id": 999})];
        enrich_validation_status(&sink, &[fk()], &mut records).await;

        assert_eq!(records[0]["validation_status"]["integrity_score"], 100.0);
        assert_eq!(records[1]["validation_status"]["integrity_score"], 0.0);
        assert_eq!(records[1]["validation_status"]["orphan_fields"][0], "partner_id");
    }

    #[tokio::test]
    async fn graph_context_reports_outgoing_fields_and_incoming_count() {
        let sink: Arc<dyn VectorSink> = Arc::new(FakeSink { points: Mutex::new(StdHashMap::new()) });
        let graph = GraphStore::new(sink, Arc::new(FakeEmbedder));
        graph
            .upsert_relationship(UpsertInput {
                source_model: "crm.lead".into(),
                source_model_id: 1,
                field_id: 1,
                field_name: "partner_id".into(),
                field_label: "Customer".into(),
                relation_kind: RelationKind::Single,
                target_model: "res.partner".into(),
                target_model_id: 2,
                depth_from_origin: 0,
                observed_edge_count: 3,
                observed_unique_targets: 2,
                cascade_source: "s".into(),
            })
            .await
            .unwrap();

        let mut records = vec![serde_json::json!({"record_id": 1})];
        enrich_graph_context(&graph, "crm.lead", &mut records).await;
        assert_eq!(records[0]["graph_context"]["outgoing_fields"][0], "partner_id");
    }
}
