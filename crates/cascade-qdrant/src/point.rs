//! Converts between the engine's point ids/payloads and Qdrant's wire types.

use std::collections::HashMap;
use std::str::FromStr;

use cascade_core::PointId;
use qdrant_client::qdrant::{PointId as QdrantPointId, PointStruct, RetrievedPoint, ScoredPoint, Value as QdrantValue};
use serde_json::Value as JsonValue;

/// One point as stored in (or retrieved from) the vector sink: an id, its
/// dense vector, and its flat payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub id: PointId,
    pub vector: Vec<f32>,
    pub payload: JsonValue,
}

impl PointRecord {
    #[must_use]
    pub fn new(id: PointId, vector: Vec<f32>, payload: JsonValue) -> Self {
        Self { id, vector, payload }
    }

    pub(crate) fn into_point_struct(self) -> PointStruct {
        let mut payload = qdrant_client::Payload::new();
        if let JsonValue::Object(map) = self.payload {
            for (key, value) in map {
                payload.insert(key, value);
            }
        }
        PointStruct {
            id: Some(id_to_qdrant(self.id)),
            vectors: Some(self.vector.into()),
            payload: payload.into(),
        }
    }
}

pub(crate) fn id_to_qdrant(id: PointId) -> QdrantPointId {
    id.to_string().into()
}

pub(crate) fn id_from_str(s: &str) -> Result<PointId, cascade_core::ids::ParseIdError> {
    PointId::from_str(s)
}

pub(crate) fn record_from_retrieved(point: RetrievedPoint) -> Option<PointRecord> {
    let id = point_id_to_string(point.id.as_ref()?)?;
    let id = id_from_str(&id).ok()?;
    let payload = payload_to_json(point.payload);
    let vector = point.vectors.and_then(vectors_to_dense).unwrap_or_default();
    Some(PointRecord { id, vector, payload })
}

pub(crate) fn scored_from_qdrant(point: ScoredPoint) -> Option<(PointRecord, f32)> {
    let id = point_id_to_string(point.id.as_ref()?)?;
    let id = id_from_str(&id).ok()?;
    let payload = payload_to_json(point.payload);
    let vector = point.vectors.and_then(vectors_to_dense).unwrap_or_default();
    Some((PointRecord { id, vector, payload }, point.score))
}

fn point_id_to_string(point_id: &QdrantPointId) -> Option<String> {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match &point_id.point_id_options {
        Some(PointIdOptions::Num(n)) => Some(n.to_string()),
        Some(PointIdOptions::Uuid(s)) => Some(s.clone()),
        None => None,
    }
}

fn vectors_to_dense(vectors: qdrant_client::qdrant::VectorsOutput) -> Option<Vec<f32>> {
    use qdrant_client::qdrant::vectors_output::VectorsOptions;
    match vectors.vectors_options {
        Some(VectorsOptions::Vector(v)) => Some(v.data),
        _ => None,
    }
}

fn payload_to_json(payload: HashMap<String, QdrantValue>) -> JsonValue {
    let map = payload.into_iter().map(|(k, v)| (k, qdrant_value_to_json(v))).collect();
    JsonValue::Object(map)
}

fn qdrant_value_to_json(value: QdrantValue) -> JsonValue {
    use qdrant_client::qdrant::value::Kind;
    match value.kind {
        Some(Kind::StringValue(s)) => JsonValue::String(s),
        Some(Kind::IntegerValue(i)) => JsonValue::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d).map_or(JsonValue::Null, JsonValue::Number),
        Some(Kind::BoolValue(b)) => JsonValue::Bool(b),
        Some(Kind::NullValue(_)) | None => JsonValue::Null,
        Some(Kind::ListValue(list)) => {
            JsonValue::Array(list.values.into_iter().map(qdrant_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => {
            JsonValue::Object(s.fields.into_iter().map(|(k, v)| (k, qdrant_value_to_json(v))).collect())
        }
    }
}
