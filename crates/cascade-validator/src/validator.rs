//! The FK validator/healer driver (spec §4.8).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use cascade_core::{ids::graph_id, OrphanSample, PointId};
use cascade_graph::GraphStore;
use cascade_qdrant::VectorSink;

use crate::auto_sync::AutoSyncer;
use crate::discovery::{discover_models, observe_fk_fields, FkReference};
use crate::report::{Discrepancy, FieldReport, ModelReport, ValidationReport};

/// Default cap on the number of orphan samples retained across a whole run.
pub const DEFAULT_ORPHAN_LIMIT: u64 = 100;
/// Existence probes are chunked this large against the vector sink.
const EXISTENCE_PROBE_CHUNK: usize = 500;

/// Failure inside the validator.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    #[error(transparent)]
    Sink(#[from] cascade_qdrant::SinkError),
    #[error(transparent)]
    Graph(#[from] cascade_graph::GraphError),
    #[error("stored point was not valid JSON: {0}")]
    Corrupt(String),
}

/// Tuning for one [`FkValidator::run`] call.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the run to one model.
    pub model: Option<String>,
    /// Check `|actual_fk_count - edge_count|` and `orphan_count == 0`
    /// per edge and classify discrepancies (spec §4.8 step 5).
    pub bidirectional: bool,
    /// Apply fixes for discrepancies found in the bidirectional pass
    /// (spec §4.8 step 6).
    pub fix: bool,
    /// Refresh cardinality fields on every edge visited (step 7).
    pub extract_patterns: bool,
    /// Append a validation-history entry on every edge visited (step 7).
    pub track_history: bool,
    /// Cap on retained orphan samples across the whole run (default 100).
    pub orphan_limit: u64,
}

impl RunOptions {
    #[must_use]
    pub fn new() -> Self {
        Self { orphan_limit: DEFAULT_ORPHAN_LIMIT, ..Default::default() }
    }
}

/// Verifies FK closure and counter accuracy across models, optionally
/// healing drift (spec §4.8).
pub struct FkValidator {
    sink: Arc<dyn VectorSink>,
    graph: Arc<GraphStore>,
    auto_syncer: Option<Arc<dyn AutoSyncer>>,
}

impl FkValidator {
    #[must_use]
    pub fn new(sink: Arc<dyn VectorSink>, graph: Arc<GraphStore>) -> Self {
        Self { sink, graph, auto_syncer: None }
    }

    #[must_use]
    pub fn with_auto_syncer(mut self, syncer: Arc<dyn AutoSyncer>) -> Self {
        self.auto_syncer = Some(syncer);
        self
    }

    /// Runs a full validation pass per `options` (spec §4.8 steps 1-7).
    pub async fn run(&self, options: &RunOptions) -> ValidationReport {
        let mut report = ValidationReport::default();
        let models = match discover_models(self.sink.as_ref(), options.model.as_deref()).await {
            Ok(models) => models,
            Err(e) => {
                report.models.push(ModelReport::Failed { model: options.model.clone().unwrap_or_default(), error: e.to_string() });
                return report;
            }
        };

        let mut orphan_budget = options.orphan_limit;
        for model in models {
            match self.validate_model(&model, options, &mut orphan_budget, &mut report).await {
                Ok(fields) => report.models.push(ModelReport::Ok { model, fields }),
                Err(e) => report.models.push(ModelReport::Failed { model, error: e.to_string() }),
            }
        }
        report
    }

    async fn validate_model(
        &self,
        model: &str,
        options: &RunOptions,
        orphan_budget: &mut u64,
        report: &mut ValidationReport,
    ) -> Result<Vec<FieldReport>, ValidatorError> {
        let observations = observe_fk_fields(self.sink.as_ref(), &self.graph, model).await?;
        let mut fields = Vec::with_capacity(observations.len());

        for observation in observations {
            if observation.target_model.is_empty() {
                // Slow path: no graph metadata, so no edge to reconcile against.
                continue;
            }

            let actual_fk_count = observation.references.len() as u64;
            let unique_refs: Vec<FkReference> = {
                let mut seen = HashSet::new();
                observation.references.iter().copied().filter(|r| seen.insert(r.qdrant_id)).collect()
            };
            let actual_unique_targets = unique_refs.len() as u64;

            let (orphans, truncated) = self.find_orphans(&unique_refs, *orphan_budget).await?;
            *orphan_budget = orphan_budget.saturating_sub(orphans.len() as u64);
            report.orphan_samples_truncated += truncated;

            let orphan_count = orphans.len() as u64;
            let integrity_score = if actual_unique_targets == 0 {
                100.0
            } else {
                ((actual_unique_targets - orphan_count) as f64 / actual_unique_targets as f64 * 100.0 * 100.0).round() / 100.0
            };

            // Model ids aren't tracked by the discovery pass; the edge id
            // only needs to match what `GraphStore::upsert_relationship`
            // derived, so look the edge up by scanning outgoing edges
            // rather than re-deriving ids from (possibly unknown) model ids.
            let Some(edge) = self
                .graph
                .outgoing_of(model)
                .await?
                .into_iter()
                .find(|e| e.field_name == observation.field_name)
            else {
                continue;
            };
            let edge_id = graph_id(edge.source_model_id, edge.target_model_id, edge.relation_kind, edge.field_id);

            let samples: Vec<OrphanSample> = orphans
                .iter()
                .take(10)
                .map(|r| OrphanSample { source_record_id: r.source_record_id, missing_target_id: r.raw_target_id })
                .collect();
            self.graph.update_validation(edge_id, Utc::now(), orphan_count, actual_unique_targets, samples).await?;

            let mut discrepancy = Discrepancy::None;
            if options.bidirectional {
                let tolerance = (edge.edge_count as f64 * 0.05).max(10.0);
                let forward_ok = (actual_fk_count as f64 - edge.edge_count as f64).abs() <= tolerance;
                let reverse_ok = orphan_count == 0;
                discrepancy = Discrepancy::classify(forward_ok, reverse_ok);
            }

            let mut fixed = false;
            if options.fix && matches!(discrepancy, Discrepancy::StaleGraph | Discrepancy::Both) {
                match self.graph.update_edge_count(edge_id, actual_fk_count, actual_unique_targets).await {
                    Ok(()) => fixed = true,
                    Err(_) => report.fix_errors += 1,
                }
            }
            if options.fix && matches!(discrepancy, Discrepancy::OrphanFks | Discrepancy::Both) {
                if let Some(syncer) = &self.auto_syncer {
                    let orphan_ids: Vec<PointId> = orphans.iter().map(|r| r.qdrant_id).collect();
                    if syncer.sync_missing(&observation.target_model, &orphan_ids).await.is_err() {
                        report.fix_errors += 1;
                    }
                }
            }

            if options.extract_patterns {
                self.graph.refresh_pattern_metadata(edge_id).await?;
            }
            if options.track_history {
                self.graph.append_validation_history(edge_id, Utc::now(), integrity_score, orphan_count).await?;
            }

            fields.push(FieldReport {
                model: model.to_string(),
                field_name: observation.field_name,
                target_model: observation.target_model,
                graph_metadata_used: observation.graph_metadata_used,
                actual_fk_count,
                actual_unique_targets,
                edge_count: edge.edge_count,
                orphan_count,
                integrity_score,
                discrepancy,
                fixed,
            });
        }

        Ok(fields)
    }

    /// Existence-checks `refs` in chunks of 500 by `qdrant_id`; anything
    /// missing is an orphan. Returns `(orphans, samples_truncated)`, capping
    /// the number of orphans returned at `budget`.
    async fn find_orphans(&self, refs: &[FkReference], budget: u64) -> Result<(Vec<FkReference>, u64), ValidatorError> {
        let mut orphans = Vec::new();
        let mut truncated = 0u64;
        for chunk in refs.chunks(EXISTENCE_PROBE_CHUNK) {
            let ids: Vec<PointId> = chunk.iter().map(|r| r.qdrant_id).collect();
            let found = self.sink.retrieve(&ids).await?;
            let found_ids: HashSet<PointId> = found.into_iter().map(|r| r.id).collect();
            for r in chunk {
                if !found_ids.contains(&r.qdrant_id) {
                    if (orphans.len() as u64) < budget {
                        orphans.push(*r);
                    } else {
                        truncated += 1;
                    }
                }
            }
        }
        Ok((orphans, truncated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cascade_core::ids::data_id;
    use cascade_core::{DataPointPayload, Point, PayloadValue, RelationKind};
    use cascade_embeddings::{EmbedError, Embedder, Role};
    use cascade_graph::UpsertInput;
    use cascade_qdrant::{FilterCondition, IndexKind, PointRecord, ScalarValue, ScrollPage, SinkError, SinkFilter};
    use parking_lot::Mutex;
    use serde_json::Value as JsonValue;
    use std::collections::HashMap;

    struct FakeSink {
        points: Mutex<HashMap<PointId, PointRecord>>,
    }

    impl FakeSink {
        fn new() -> Self {
            Self { points: Mutex::new(HashMap::new()) }
        }
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
            let records = store.values().filter(|r| matches_filter(r, filter)).cloned().collect();
            Ok(ScrollPage { records, next_offset: None })
        }

        async fn retrieve(&self, ids: &[PointId]) -> Result<Vec<PointRecord>, SinkError> {
            let store = self.points.lock();
            Ok(ids.iter().filter_map(|id| store.get(id).cloned()).collect())
        }

        async fn delete_by_ids(&self, ids: &[PointId]) -> Result<(), SinkError> {
            let mut store = self.points.lock();
            for id in ids {
                store.remove(id);
            }
            Ok(())
        }

        async fn delete_by_filter(&self, _filter: &SinkFilter) -> Result<(), SinkError> {
            Ok(())
        }

        async fn create_payload_index(&self, _field: &str, _kind: IndexKind) -> Result<(), SinkError> {
            Ok(())
        }

        async fn count(&self, filter: Option<&SinkFilter>) -> Result<u64, SinkError> {
            let store = self.points.lock();
            Ok(store.values().filter(|r| matches_filter(r, filter)).count() as u64)
        }

        async fn search(&self, _vector: &[f32], filter: Option<&SinkFilter>, k: u64) -> Result<Vec<(PointRecord, f32)>, SinkError> {
            let store = self.points.lock();
            Ok(store.values().filter(|r| matches_filter(r, filter)).take(k as usize).map(|r| (r.clone(), 1.0)).collect())
        }
    }

    fn matches_filter(record: &PointRecord, filter: Option<&SinkFilter>) -> bool {
        let Some(filter) = filter else { return true };
        filter.conditions.iter().all(|condition| match condition {
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
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text, role).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            1
        }
    }

    fn data_point(model: &str, model_id: u16, record_id: u64, field_name: &str, raw_target: i64, target_id: PointId) -> PointRecord {
        let mut fields = HashMap::new();
        fields.insert(field_name.to_string(), PayloadValue::SingleRef { raw: raw_target, qdrant: target_id });
        let payload = DataPointPayload {
            model_name: model.to_string(),
            model_id,
            record_id,
            sync_timestamp: Utc::now(),
            fields,
            vector_text: String::new(),
            graph_refs: vec![],
        };
        let json = serde_json::to_value(Point::Data(payload)).unwrap();
        PointRecord::new(data_id(model_id, record_id), vec![1.0], json)
    }

    async fn seeded() -> (Arc<dyn VectorSink>, Arc<GraphStore>) {
        let sink: Arc<dyn VectorSink> = Arc::new(FakeSink::new());
        let graph = Arc::new(GraphStore::new(sink.clone(), Arc::new(FakeEmbedder)));

        graph
            .upsert_relationship(UpsertInput {
                source_model: "crm.lead".into(),
                source_model_id: 1,
                field_id: 7,
                field_name: "partner_id".into(),
                field_label: "Customer".into(),
                relation_kind: RelationKind::Single,
                target_model: "res.partner".into(),
                target_model_id: 2,
                depth_from_origin: 0,
                observed_edge_count: 2,
                observed_unique_targets: 2,
                cascade_source: "crm.lead".into(),
            })
            .await
            .unwrap();

        let target = data_id(2, 100);
        let target_payload = DataPointPayload {
            model_name: "res.partner".into(),
            model_id: 2,
            record_id: 100,
            sync_timestamp: Utc::now(),
            fields: HashMap::new(),
            vector_text: String::new(),
            graph_refs: vec![],
        };
        let target_json = serde_json::to_value(Point::Data(target_payload)).unwrap();
        sink.upsert(vec![PointRecord::new(target, vec![1.0], target_json)]).await.unwrap();

        sink.upsert(vec![data_point("crm.lead", 1, 1, "partner_id", 100, target)]).await.unwrap();
        sink.upsert(vec![data_point("crm.lead", 1, 2, "partner_id", 999, data_id(2, 999))]).await.unwrap();

        (sink, graph)
    }

    #[tokio::test]
    async fn run_reports_ok_field_with_one_orphan() {
        let (sink, graph) = seeded().await;
        let validator = FkValidator::new(sink, graph);
        let report = validator.run(&RunOptions::new()).await;

        assert_eq!(report.total_orphans(), 1);
        let ModelReport::Ok { fields, .. } = &report.models[0] else { panic!("expected Ok report") };
        let field = &fields[0];
        assert_eq!(field.field_name, "partner_id");
        assert_eq!(field.actual_unique_targets, 2);
        assert_eq!(field.orphan_count, 1);
        assert_eq!(field.integrity_score, 50.0);
    }

    #[tokio::test]
    async fn bidirectional_classifies_orphan_fks_when_forward_matches() {
        let (sink, graph) = seeded().await;
        let validator = FkValidator::new(sink, graph);
        let mut options = RunOptions::new();
        options.bidirectional = true;
        let report = validator.run(&options).await;

        let ModelReport::Ok { fields, .. } = &report.models[0] else { panic!("expected Ok report") };
        assert_eq!(fields[0].discrepancy, Discrepancy::OrphanFks);
    }

    #[tokio::test]
    async fn orphan_budget_of_zero_suppresses_samples_but_counts_truncation() {
        let (sink, graph) = seeded().await;
        let validator = FkValidator::new(sink, graph);
        let mut options = RunOptions::new();
        options.orphan_limit = 0;
        let report = validator.run(&options).await;

        assert_eq!(report.orphan_samples_truncated, 1);
        let ModelReport::Ok { fields, .. } = &report.models[0] else { panic!("expected Ok report") };
        assert_eq!(fields[0].orphan_count, 0);
    }
}
