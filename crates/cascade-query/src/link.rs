//! FK link resolution (spec §4.9, "Link resolution"): batch-resolves
//! foreign-key target records onto the scrolled source records without a
//! per-record round trip to the sink.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use cascade_core::ids::data_id;
use cascade_core::schema::FkField;
use cascade_qdrant::VectorSink;

/// Fields copied from a resolved target record onto the source record,
/// unless the caller supplies its own list.
pub const DEFAULT_LINK_FIELDS: &[&str] = &["name", "display_name"];

/// Resolves `link_field` (an FK field on `model`) across every record in
/// `records`, attaching `<link_field>_linked` with the requested fields
/// from each resolved target. Missing targets are left unresolved rather
/// than failing the whole batch.
pub async fn resolve_link(
    sink: &dyn VectorSink,
    fk: &FkField,
    records: &mut [JsonValue],
    fields: &[String],
) -> Result<(), cascade_qdrant::SinkError> {
    let mut target_ids: Vec<i64> = Vec::new();
    for record in records.iter() {
        collect_raw_ids(record, &fk.field.name, &mut target_ids);
    }
    target_ids.sort_unstable();
    target_ids.dedup();
    if target_ids.is_empty() {
        return Ok(());
    }

    let resolved = retrieve_targets(sink, fk.target_model_id, &target_ids).await?;

    for record in records.iter_mut() {
        attach_links(record, &fk.field.name, &resolved, fields);
    }
    Ok(())
}

/// Resolves a JSON-object field whose keys are record ids (as strings) and
/// values are weights (spec §4.9, "`link_json` applies the same logic").
/// Each key is resolved against `target_model_id` and the weight is kept
/// alongside the resolved fields.
pub async fn resolve_link_json(
    sink: &dyn VectorSink,
    json_field: &str,
    target_model_id: u16,
    records: &mut [JsonValue],
    fields: &[String],
) -> Result<(), cascade_qdrant::SinkError> {
    let mut target_ids: Vec<i64> = Vec::new();
    for record in records.iter() {
        if let Some(JsonValue::Object(map)) = record.get(json_field) {
            for key in map.keys() {
                if let Ok(id) = key.parse::<i64>() {
                    target_ids.push(id);
                }
            }
        }
    }
    target_ids.sort_unstable();
    target_ids.dedup();
    if target_ids.is_empty() {
        return Ok(());
    }

    let resolved = retrieve_targets(sink, target_model_id, &target_ids).await?;

    for record in records.iter_mut() {
        let Some(JsonValue::Object(map)) = record.get(json_field).cloned() else { continue };
        let mut linked = serde_json::Map::new();
        for (key, weight) in map {
            let Ok(id) = key.parse::<i64>() else { continue };
            let Some(target) = resolved.get(&id) else { continue };
            let mut entry = projected_fields(target, fields);
            entry.insert("weight".to_string(), weight);
            linked.insert(key, JsonValue::Object(entry));
        }
        if let JsonValue::Object(obj) = record {
            obj.insert(format!("{json_field}_linked"), JsonValue::Object(linked));
        }
    }
    Ok(())
}

async fn retrieve_targets(
    sink: &dyn VectorSink,
    target_model_id: u16,
    target_ids: &[i64],
) -> Result<HashMap<i64, JsonValue>, cascade_qdrant::SinkError> {
    let point_ids: Vec<_> = target_ids.iter().map(|raw| data_id(target_model_id, *raw as u64)).collect();
    // `retrieve` may return fewer records than requested (missing ids are
    // silently omitted); match back to raw ids via the resolved payload's
    // own record_id rather than positionally.
    let mut out = HashMap::new();
    for point in sink.retrieve(&point_ids).await? {
        if let Some(record_id) = point.payload.get("record_id").and_then(JsonValue::as_i64) {
            out.insert(record_id, point.payload);
        }
    }
    Ok(out)
}

fn collect_raw_ids(record: &JsonValue, field: &str, out: &mut Vec<i64>) {
    let Some(value) = record.get(field) else { return };
    match value {
        JsonValue::Number(_) => {
            if let Some(raw) = value.as_i64() {
                out.push(raw);
            }
        }
        JsonValue::Array(raws) => {
            out.extend(raws.iter().filter_map(JsonValue::as_i64));
        }
        _ => {}
    }
}

fn projected_fields(target: &JsonValue, fields: &[String]) -> serde_json::Map<String, JsonValue> {
    let wanted: &[String] = if fields.is_empty() {
        return DEFAULT_LINK_FIELDS
            .iter()
            .filter_map(|f| target.get(f).map(|v| ((*f).to_string(), v.clone())))
            .collect();
    } else {
        fields
    };
    wanted.iter().filter_map(|f| target.get(f).map(|v| (f.clone(), v.clone()))).collect()
}

fn attach_links(record: &mut JsonValue, field: &str, resolved: &HashMap<i64, JsonValue>, fields: &[String]) {
    let mut raw_ids = Vec::new();
    collect_raw_ids(record, field, &mut raw_ids);
    if raw_ids.is_empty() {
        return;
    }
    let linked: Vec<JsonValue> = raw_ids
        .iter()
        .filter_map(|raw| resolved.get(raw))
        .map(|target| JsonValue::Object(projected_fields(target, fields)))
        .collect();
    if let JsonValue::Object(obj) = record {
        let value = if linked.len() == 1 {
            linked.into_iter().next().unwrap_or(JsonValue::Null)
        } else {
            JsonValue::Array(linked)
        };
        obj.insert(format!("{field}_linked"), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cascade_qdrant::{IndexKind, PointRecord, ScrollPage, SinkError, SinkFilter};
    use cascade_core::PointId;
    use cascade_core::schema::{Field, FieldType};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

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
        async fn scroll(&self, _filter: Option<&SinkFilter>, _cursor: Option<PointId>, _limit: u32) -> Result<ScrollPage, SinkError> {
            Ok(ScrollPage::default())
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
        async fn search(&self, _vector: &[f32], _filter: Option<&SinkFilter>, _k: u64) -> Result<Vec<(PointRecord, f32)>, SinkError> {
            Ok(Vec::new())
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
    async fn resolve_link_attaches_default_fields() {
        let sink = FakeSink { points: Mutex::new(StdHashMap::new()) };
        let target_id = data_id(2, 100);
        sink.points.lock().insert(
            target_id,
            PointRecord::new(target_id, vec![], json!({"record_id": 100, "name": "Acme", "display_name": "Acme Inc"})),
        );

        let mut records = vec![json!({"partner_id": 100})];
        resolve_link(&sink, &fk(), &mut records, &[]).await.unwrap();

        assert_eq!(records[0]["partner_id_linked"]["name"], "Acme");
        assert_eq!(records[0]["partner_id_linked"]["display_name"], "Acme Inc");
    }

    #[tokio::test]
    async fn resolve_link_leaves_missing_targets_unresolved() {
        let sink = FakeSink { points: Mutex::new(StdHashMap::new()) };
        let mut records = vec![json!({"partner_id": 999})];
        resolve_link(&sink, &fk(), &mut records, &[]).await.unwrap();
        assert!(records[0].get("partner_id_linked").is_none());
    }
}
