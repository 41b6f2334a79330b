//! The exact query engine's single entry point (spec §4.9): filter
//! translation, streaming scroll, aggregation-or-record collection, link
//! resolution, bounded enrichment, and response shaping, wired together.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value as JsonValue;

use cascade_core::ids::data_id;
use cascade_core::{Error as CoreError, Result as CoreResult, SchemaRegistry};
use cascade_graph::GraphStore;
use cascade_qdrant::{FilterCondition, ScalarValue, SinkFilter, VectorSink};

use crate::aggregator::{Aggregation, Aggregator, GroupResult, ReconciliationChecksum};
use crate::enrichment::{self, MAX_SIMILAR_LIMIT};
use crate::filter::{self, Condition};
use crate::link;
use crate::shaping::{self, DetailLevel, ExportDescriptor};

const SCROLL_PAGE_SIZE: u32 = 200;

/// One `search` request (spec §6's `search` command).
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub model: String,
    pub filters: Vec<Condition>,
    pub aggregations: Vec<Aggregation>,
    pub group_by: Vec<String>,
    pub fields: Vec<String>,
    pub limit: u64,
    pub offset: u64,
    pub link: Option<String>,
    pub link_fields: Vec<String>,
    pub link_json: Option<String>,
    pub link_json_target_model: Option<String>,
    pub include_graph_context: bool,
    pub include_validation_status: bool,
    pub include_similar: bool,
    pub similar_limit: u64,
    pub detail_level: DetailLevel,
    pub top_n: usize,
    pub export_to_file: bool,
}

impl QueryRequest {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            filters: Vec::new(),
            aggregations: Vec::new(),
            group_by: Vec::new(),
            fields: Vec::new(),
            limit: 100,
            offset: 0,
            link: None,
            link_fields: Vec::new(),
            link_json: None,
            link_json_target_model: None,
            include_graph_context: false,
            include_validation_status: false,
            include_similar: false,
            similar_limit: 5,
            detail_level: DetailLevel::Full,
            top_n: 20,
            export_to_file: false,
        }
    }
}

impl Default for DetailLevel {
    fn default() -> Self {
        DetailLevel::Full
    }
}

/// Aggregation-mode half of [`QueryResponse`].
#[derive(Debug, Clone)]
pub struct AggregationResult {
    pub groups: Vec<GroupResult>,
    pub remaining_groups: Option<usize>,
    pub checksum: ReconciliationChecksum,
}

/// A complete `search` response: either aggregated or record-mode, never both.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub aggregation: Option<AggregationResult>,
    pub records: Option<Vec<JsonValue>>,
    pub truncated: bool,
    pub estimated_tokens: u64,
    pub effective_detail_level: DetailLevel,
    pub elapsed: Duration,
    pub export: Option<ExportDescriptor>,
}

/// Ties the sink, graph store and schema registry together behind the
/// `search` contract.
pub struct QueryEngine {
    sink: Arc<dyn VectorSink>,
    graph: Arc<GraphStore>,
    registry: Arc<SchemaRegistry>,
}

impl QueryEngine {
    #[must_use]
    pub fn new(sink: Arc<dyn VectorSink>, graph: Arc<GraphStore>, registry: Arc<SchemaRegistry>) -> Self {
        Self { sink, graph, registry }
    }

    /// Runs one `search` request end to end.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown, the filter references a
    /// non-evaluable field, or the sink call itself fails.
    pub async fn run(&self, request: &QueryRequest) -> CoreResult<QueryResponse> {
        let started = Instant::now();
        if self.registry.is_empty() {
            return Err(CoreError::SchemaEmpty);
        }
        if self.registry.model_id(&request.model).is_none() {
            return Err(CoreError::SchemaMissing { model: request.model.clone(), suggestions: self.registry.suggest_models(&request.model, 3) });
        }

        let planned = filter::plan(&request.filters).map_err(|fields| CoreError::UnindexedFilter { fields })?;
        let mut sink_filter = planned.sink.clone();
        sink_filter = sink_filter.with(FilterCondition::Equals { field: "model_name".into(), value: ScalarValue::Str(request.model.clone()) });

        let matched = self.scroll_and_filter(&sink_filter, &planned, request).await?;

        let response = if request.aggregations.is_empty() {
            self.record_mode(request, matched, started).await?
        } else {
            self.aggregation_mode(request, matched, started)
        };
        Ok(response)
    }

    async fn scroll_and_filter(
        &self,
        sink_filter: &SinkFilter,
        planned: &filter::PlannedFilter,
        request: &QueryRequest,
    ) -> CoreResult<Vec<(cascade_core::PointId, JsonValue, Vec<f32>)>> {
        let mut matched = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .sink
                .scroll(Some(sink_filter), cursor, SCROLL_PAGE_SIZE)
                .await
                .map_err(|e| CoreError::SinkError(e.to_string()))?;
            for record in page.records {
                if self.passes_post_scroll(&record.payload, planned, request).await? {
                    matched.push((record.id, record.payload, record.vector));
                }
            }
            match page.next_offset {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(matched)
    }

    async fn passes_post_scroll(&self, payload: &JsonValue, planned: &filter::PlannedFilter, request: &QueryRequest) -> CoreResult<bool> {
        for (idx, condition) in planned.post_scroll.iter().enumerate() {
            let dot = planned.dot_notation.iter().find(|(i, _, _)| *i == idx);
            let value = match dot {
                Some((_, fk_field, target_field)) => {
                    match self.resolve_dot_notation(payload, fk_field, target_field, &request.model).await? {
                        Some(v) => v,
                        None => return Ok(false),
                    }
                }
                None => payload.get(&condition.field).cloned().unwrap_or(JsonValue::Null),
            };
            if !filter::matches(&value, condition.op, &condition.value) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn resolve_dot_notation(&self, payload: &JsonValue, fk_field: &str, target_field: &str, model: &str) -> CoreResult<Option<JsonValue>> {
        let fk = self.registry.fk_fields_of(model).into_iter().find(|f| f.field.name == fk_field);
        let Some(fk) = fk else { return Ok(None) };
        let Some(raw) = payload.get(fk_field).and_then(JsonValue::as_i64) else { return Ok(None) };
        let point_id = data_id(fk.target_model_id, raw as u64);
        let found = self.sink.retrieve(&[point_id]).await.map_err(|e| CoreError::SinkError(e.to_string()))?;
        Ok(found.into_iter().next().and_then(|p| p.payload.get(target_field).cloned()))
    }

    async fn record_mode(
        &self,
        request: &QueryRequest,
        matched: Vec<(cascade_core::PointId, JsonValue, Vec<f32>)>,
        started: Instant,
    ) -> CoreResult<QueryResponse> {
        let total_matched = matched.len();
        let offset = request.offset as usize;
        let limit = request.limit as usize;
        let page: Vec<(cascade_core::PointId, JsonValue, Vec<f32>)> =
            matched.into_iter().skip(offset).take(limit).collect();
        let truncated = offset + page.len() < total_matched;

        let mut records: Vec<JsonValue> = page.iter().map(|(_, payload, _)| project(payload, &request.fields)).collect();
        let id_vector_index: Vec<(usize, cascade_core::PointId, Vec<f32>)> =
            page.iter().enumerate().map(|(i, (id, _, vector))| (i, *id, vector.clone())).collect();

        if let Some(link_field) = &request.link {
            if let Some(fk) = self.registry.fk_fields_of(&request.model).into_iter().find(|f| &f.field.name == link_field) {
                link::resolve_link(self.sink.as_ref(), &fk, &mut records, &request.link_fields)
                    .await
                    .map_err(|e| CoreError::SinkError(e.to_string()))?;
            }
        }
        if let (Some(json_field), Some(target_model)) = (&request.link_json, &request.link_json_target_model) {
            if let Some(target_model_id) = self.registry.model_id(target_model) {
                link::resolve_link_json(self.sink.as_ref(), json_field, target_model_id, &mut records, &request.link_fields)
                    .await
                    .map_err(|e| CoreError::SinkError(e.to_string()))?;
            }
        }
        if request.include_graph_context {
            enrichment::enrich_graph_context(&self.graph, &request.model, &mut records).await;
        }
        if request.include_validation_status {
            let fk_fields = self.registry.fk_fields_of(&request.model);
            enrichment::enrich_validation_status(self.sink.as_ref(), &fk_fields, &mut records).await;
        }
        if request.include_similar {
            let limit = request.similar_limit.clamp(1, MAX_SIMILAR_LIMIT);
            enrichment::enrich_similar(self.sink.as_ref(), &request.model, limit, &id_vector_index, &mut records).await;
        }

        let has_nested = records.iter().any(|r| r.as_object().is_some_and(|o| o.values().any(JsonValue::is_object)));
        let field_count = request.fields.len().max(1);
        let estimated_tokens = shaping::estimate_record_mode_tokens(records.len(), field_count, has_nested);
        let effective = shaping::recommend_detail_level(estimated_tokens, shaping::DEFAULT_TOKEN_THRESHOLD, request.detail_level);

        let export = if request.export_to_file { Some(shaping::export_descriptor(&request.model, Utc::now())) } else { None };
        let records = if export.is_some() { None } else { Some(records) };

        Ok(QueryResponse {
            aggregation: None,
            records,
            truncated,
            estimated_tokens,
            effective_detail_level: effective,
            elapsed: started.elapsed(),
            export,
        })
    }

    fn aggregation_mode(
        &self,
        request: &QueryRequest,
        matched: Vec<(cascade_core::PointId, JsonValue, Vec<f32>)>,
        started: Instant,
    ) -> QueryResponse {
        let mut aggregator = Aggregator::new(request.aggregations.clone(), request.group_by.clone());
        for (_, payload, _) in &matched {
            aggregator.observe(payload);
        }
        let (groups, checksum) = aggregator.finish(Utc::now());
        let estimated_tokens = if request.group_by.is_empty() {
            shaping::estimate_simple_aggregation_tokens(request.aggregations.len())
        } else {
            shaping::estimate_grouped_aggregation_tokens(groups.len(), request.aggregations.len())
        };
        let effective = shaping::recommend_detail_level(estimated_tokens, shaping::DEFAULT_TOKEN_THRESHOLD, request.detail_level);
        let (shaped, remaining_groups) = shaping::shape_groups(groups, effective, request.top_n);

        let export = if request.export_to_file { Some(shaping::export_descriptor(&request.model, Utc::now())) } else { None };
        let aggregation =
            if export.is_some() { None } else { Some(AggregationResult { groups: shaped, remaining_groups, checksum }) };

        QueryResponse {
            aggregation,
            records: None,
            truncated: remaining_groups.is_some(),
            estimated_tokens,
            effective_detail_level: effective,
            elapsed: started.elapsed(),
            export,
        }
    }
}

fn project(payload: &JsonValue, fields: &[String]) -> JsonValue {
    if fields.is_empty() {
        return payload.clone();
    }
    let Some(obj) = payload.as_object() else { return payload.clone() };
    let projected: serde_json::Map<String, JsonValue> =
        fields.iter().filter_map(|f| obj.get(f).map(|v| (f.clone(), v.clone()))).collect();
    JsonValue::Object(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Op;
    use async_trait::async_trait;
    use cascade_core::schema::{Field, FieldType, Model};
    use cascade_core::PointId;
    use cascade_embeddings::{EmbedError, Embedder, Role};
    use cascade_qdrant::{IndexKind, PointRecord, ScrollPage, SinkError};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    struct FakeSink {
        points: Mutex<HashMap<PointId, PointRecord>>,
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
            Ok(ScrollPage { records: store.values().filter(|r| matches_filter(r, filter)).cloned().collect(), next_offset: None })
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

    fn matches_filter(record: &PointRecord, filter: Option<&SinkFilter>) -> bool {
        let Some(filter) = filter else { return true };
        filter.conditions.iter().all(|c| match c {
            FilterCondition::Equals { field, value } => record.payload.get(field).map(|v| scalar_matches(v, value)).unwrap_or(false),
            _ => true,
        })
    }

    fn scalar_matches(json: &JsonValue, value: &ScalarValue) -> bool {
        match value {
            ScalarValue::Str(s) => json.as_str() == Some(s.as_str()),
            ScalarValue::Int(i) => json.as_i64() == Some(*i),
            ScalarValue::Bool(b) => json.as_bool() == Some(*b),
        }
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

    fn registry() -> SchemaRegistry {
        let lead = Model {
            name: "crm.lead".to_string(),
            id: 1,
            fields: vec![Field {
                id: 1,
                name: "amount".to_string(),
                label: "Amount".to_string(),
                field_type: FieldType::Number,
                is_derived: false,
                payload_enabled: true,
                fk_target_model: None,
                fk_target_model_id: None,
            }],
        };
        let indexed: HashSet<String> = ["model_name", "record_id", "point_type"].into_iter().map(String::from).collect();
        SchemaRegistry::new(vec![lead], indexed)
    }

    fn engine_with(records: Vec<JsonValue>) -> QueryEngine {
        let sink = FakeSink { points: Mutex::new(HashMap::new()) };
        for (i, payload) in records.into_iter().enumerate() {
            let id = data_id(1, i as u64);
            sink.points.lock().insert(id, PointRecord::new(id, vec![0.0], payload));
        }
        let sink: Arc<dyn VectorSink> = Arc::new(sink);
        let graph = Arc::new(GraphStore::new(sink.clone(), Arc::new(FakeEmbedder)));
        QueryEngine::new(sink, graph, Arc::new(registry()))
    }

    #[tokio::test]
    async fn unknown_model_is_rejected() {
        let engine = engine_with(vec![]);
        let err = engine.run(&QueryRequest::new("no.such.model")).await.unwrap_err();
        assert!(matches!(err, CoreError::SchemaMissing { .. }));
    }

    #[tokio::test]
    async fn unindexed_filter_field_is_rejected() {
        let engine = engine_with(vec![json!({"model_name": "crm.lead", "record_id": 0})]);
        let mut request = QueryRequest::new("crm.lead");
        request.filters = vec![Condition::new("mystery_field", Op::Eq, json!(1))];
        let err = engine.run(&request).await.unwrap_err();
        assert!(matches!(err, CoreError::UnindexedFilter { .. }));
    }

    #[tokio::test]
    async fn aggregation_mode_sums_matching_records() {
        let engine = engine_with(vec![
            json!({"model_name": "crm.lead", "record_id": 0, "amount": 10.0}),
            json!({"model_name": "crm.lead", "record_id": 1, "amount": 25.0}),
        ]);
        let mut request = QueryRequest::new("crm.lead");
        request.aggregations = vec![Aggregation { field: "amount".to_string(), op: crate::aggregator::AggOp::Sum, alias: "total".to_string() }];
        let response = engine.run(&request).await.unwrap();
        let agg = response.aggregation.unwrap();
        assert_eq!(agg.checksum.grand_total, 35.0);
        assert_eq!(agg.groups[0].values["total"], 35.0);
    }

    #[tokio::test]
    async fn record_mode_respects_limit_and_reports_truncated() {
        let engine = engine_with(vec![
            json!({"model_name": "crm.lead", "record_id": 0, "amount": 1.0}),
            json!({"model_name": "crm.lead", "record_id": 1, "amount": 2.0}),
            json!({"model_name": "crm.lead", "record_id": 2, "amount": 3.0}),
        ]);
        let mut request = QueryRequest::new("crm.lead");
        request.limit = 2;
        let response = engine.run(&request).await.unwrap();
        assert_eq!(response.records.unwrap().len(), 2);
        assert!(response.truncated);
    }

    #[tokio::test]
    async fn export_to_file_returns_descriptor_with_no_inline_records() {
        let engine = engine_with(vec![json!({"model_name": "crm.lead", "record_id": 0, "amount": 1.0})]);
        let mut request = QueryRequest::new("crm.lead");
        request.export_to_file = true;
        let response = engine.run(&request).await.unwrap();
        assert!(response.records.is_none());
        assert!(response.export.is_some());
    }
}
