//! Model discovery and FK field detection (spec §4.8 steps 1-2).

use std::collections::{HashMap, HashSet};

use cascade_core::{DataPointPayload, Point, PayloadValue, PointId};
use cascade_graph::GraphStore;
use cascade_qdrant::{FilterCondition, ScalarValue, SinkFilter, VectorSink};

use crate::ValidatorError;

const SCROLL_PAGE_SIZE: u32 = 200;

fn data_filter(model: Option<&str>) -> SinkFilter {
    let mut filter = SinkFilter::new()
        .with(FilterCondition::Equals { field: "point_type".into(), value: ScalarValue::Str("data".into()) });
    if let Some(model) = model {
        filter = filter.with(FilterCondition::Equals { field: "model_name".into(), value: ScalarValue::Str(model.to_string()) });
    }
    filter
}

async fn scroll_data_points(sink: &dyn VectorSink, model: Option<&str>) -> Result<Vec<DataPointPayload>, ValidatorError> {
    let filter = data_filter(model);
    let mut out = Vec::new();
    let mut cursor = None;
    loop {
        let page = sink.scroll(Some(&filter), cursor, SCROLL_PAGE_SIZE).await?;
        for record in page.records {
            match serde_json::from_value::<Point>(record.payload) {
                Ok(Point::Data(data)) => out.push(data),
                Ok(_) => {}
                Err(e) => return Err(ValidatorError::Corrupt(e.to_string())),
            }
        }
        match page.next_offset {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(out)
}

/// Distinct model names among `point_type=data` points, optionally
/// restricted to one model (spec §4.8 step 1).
pub async fn discover_models(sink: &dyn VectorSink, restrict_to: Option<&str>) -> Result<Vec<String>, ValidatorError> {
    if let Some(model) = restrict_to {
        return Ok(vec![model.to_string()]);
    }
    let points = scroll_data_points(sink, None).await?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut models = Vec::new();
    for point in points {
        if seen.insert(point.model_name.clone()) {
            models.push(point.model_name);
        }
    }
    Ok(models)
}

/// One FK reference: the record that holds it, the raw upstream target id,
/// and the resolved point id to existence-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FkReference {
    pub source_record_id: u64,
    pub raw_target_id: u64,
    pub qdrant_id: PointId,
}

/// One FK field on `model`, and the references it carried across every
/// record encountered.
#[derive(Debug, Clone)]
pub struct FkFieldObservation {
    pub field_name: String,
    pub target_model: String,
    pub graph_metadata_used: bool,
    pub references: Vec<FkReference>,
}

/// Detects FK fields for `model` and collects every target id they
/// referenced. Fast path uses the graph store's outgoing edges to know
/// which fields are FK fields; slow path scrolls payloads and treats every
/// `SingleRef`/`MultiRef` field as an FK candidate (spec §4.8 step 2).
pub async fn observe_fk_fields(sink: &dyn VectorSink, graph: &GraphStore, model: &str) -> Result<Vec<FkFieldObservation>, ValidatorError> {
    let outgoing = graph.outgoing_of(model).await?;
    let data_points = scroll_data_points(sink, Some(model)).await?;

    if outgoing.is_empty() {
        return Ok(observe_slow_path(&data_points));
    }

    let mut by_field: HashMap<String, (String, Vec<FkReference>)> = HashMap::new();
    for edge in &outgoing {
        by_field.entry(edge.field_name.clone()).or_insert_with(|| (edge.target_model.clone(), Vec::new()));
    }
    for point in &data_points {
        for (field_name, value) in &point.fields {
            let Some((_, refs)) = by_field.get_mut(field_name) else { continue };
            collect_refs(point.record_id, value, refs);
        }
    }
    Ok(by_field
        .into_iter()
        .map(|(field_name, (target_model, references))| FkFieldObservation {
            field_name,
            target_model,
            graph_metadata_used: true,
            references,
        })
        .collect())
}

fn observe_slow_path(data_points: &[DataPointPayload]) -> Vec<FkFieldObservation> {
    let mut by_field: HashMap<String, Vec<FkReference>> = HashMap::new();
    for point in data_points {
        for (field_name, value) in &point.fields {
            if matches!(value, PayloadValue::SingleRef { .. } | PayloadValue::MultiRef { .. }) {
                collect_refs(point.record_id, value, by_field.entry(field_name.clone()).or_default());
            }
        }
    }
    by_field
        .into_iter()
        .map(|(field_name, references)| FkFieldObservation {
            field_name,
            target_model: String::new(),
            graph_metadata_used: false,
            references,
        })
        .collect()
}

fn collect_refs(source_record_id: u64, value: &PayloadValue, out: &mut Vec<FkReference>) {
    match value {
        PayloadValue::SingleRef { raw, qdrant } => {
            out.push(FkReference { source_record_id, raw_target_id: *raw as u64, qdrant_id: *qdrant });
        }
        PayloadValue::MultiRef { raw, qdrant } => {
            for (r, q) in raw.iter().zip(qdrant.iter()) {
                out.push(FkReference { source_record_id, raw_target_id: *r as u64, qdrant_id: *q });
            }
        }
        PayloadValue::Scalar(_) => {}
    }
}
