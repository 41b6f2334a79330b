//! Recursive FK-driven sync orchestration: syncs one origin model, then
//! follows its foreign-key references outward through a bounded worker
//! pool, materializing graph edges as it goes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;

use cascade_core::ids::data_id;
use cascade_core::PointId;
use cascade_graph::{GraphStore, UpsertInput};
use cascade_upstream::{DateWindow, Domain};
use cascade_validator::auto_sync::AutoSyncer;

use crate::config::CascadeConfig;
use crate::lock::SyncLockRegistry;
use crate::pipeline::{run_model_sync, ModelSyncPlan, PipelineContext};
use crate::queue::WorkQueue;
use crate::result::{CascadeResult, ModelSyncResult, SyncOutcome, SyncType};

const EXISTENCE_PROBE_CHUNK: usize = 500;

/// One request to cascade-sync a model and everything it references.
#[derive(Debug, Clone)]
pub struct CascadeRequest {
    pub model: String,
    pub token: String,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub record_ids: Option<Vec<u64>>,
    pub incremental_since: Option<DateTime<Utc>>,
    pub skip_existing: Option<bool>,
    pub parallel_targets: Option<u8>,
    pub update_graph: bool,
    pub dry_run: bool,
    pub depth_cap_override: Option<u32>,
}

impl CascadeRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            token: token.into(),
            date_from: None,
            date_to: None,
            record_ids: None,
            incremental_since: None,
            skip_existing: None,
            parallel_targets: None,
            update_graph: true,
            dry_run: false,
            depth_cap_override: None,
        }
    }
}

fn origin_domain(request: &CascadeRequest) -> (Domain, SyncType) {
    if let Some(ids) = &request.record_ids {
        return (Domain::for_ids(ids.clone()), SyncType::Targeted);
    }
    let create_date_window = if request.date_from.is_some() || request.date_to.is_some() {
        Some(DateWindow { from: request.date_from.clone(), to: request.date_to.clone() })
    } else {
        None
    };
    let sync_type = if request.incremental_since.is_some() { SyncType::Incremental } else { SyncType::Full };
    let domain = Domain { watermark: request.incremental_since, record_ids: None, include_archived: false, create_date_window };
    (domain, sync_type)
}

/// A batch of newly-discovered FK target ids for one model, waiting to be sub-synced.
struct WorkItem {
    target_model: String,
    target_model_id: u16,
    ids: Vec<u64>,
    depth: u32,
}

struct CascadeState {
    outcomes: AsyncMutex<HashMap<String, SyncOutcome>>,
    visited: AsyncMutex<HashSet<(String, u64)>>,
    cycles_skipped: AtomicU64,
    depth_reached: AtomicU32,
}

impl CascadeState {
    fn new() -> Self {
        Self {
            outcomes: AsyncMutex::new(HashMap::new()),
            visited: AsyncMutex::new(HashSet::new()),
            cycles_skipped: AtomicU64::new(0),
            depth_reached: AtomicU32::new(0),
        }
    }
}

/// Drives one cascade run end to end: the origin model's primary sync,
/// graph-edge materialization, and a worker pool that expands FK
/// dependencies breadth-first up to a depth cap.
#[derive(Clone)]
pub struct Coordinator {
    ctx: Arc<PipelineContext>,
    graph: Arc<GraphStore>,
    locks: Arc<SyncLockRegistry>,
    config: CascadeConfig,
}

impl Coordinator {
    #[must_use]
    pub fn new(ctx: Arc<PipelineContext>, graph: Arc<GraphStore>, locks: Arc<SyncLockRegistry>, config: CascadeConfig) -> Self {
        Self { ctx, graph, locks, config }
    }

    /// The stable `cascade_source` tag written onto every edge and result
    /// produced by one cascade run.
    #[must_use]
    pub fn request_id(model: &str, token: &str) -> String {
        format!("pipeline_{model}_{token}")
    }

    pub async fn run(&self, request: CascadeRequest) -> CascadeResult {
        let started = Instant::now();
        let request_id = Self::request_id(&request.model, &request.token);
        let depth_cap = request.depth_cap_override.unwrap_or(self.config.depth_cap);
        let parallel_targets = request.parallel_targets.unwrap_or(self.config.parallel_targets).clamp(1, 10);
        let skip_existing = request.skip_existing.unwrap_or(self.config.skip_existing);
        let update_graph = request.update_graph && !request.dry_run;
        let dry_run = request.dry_run;

        let state = Arc::new(CascadeState::new());
        let queue: Arc<WorkQueue<WorkItem>> = Arc::new(WorkQueue::new());

        let (domain, sync_type) = origin_domain(&request);
        self.sync_one(&request.model, domain, sync_type, 0, &request_id, update_graph, dry_run, depth_cap, &state, &queue)
            .await;

        let mut workers = Vec::with_capacity(parallel_targets as usize);
        for _ in 0..parallel_targets {
            let coordinator = self.clone();
            let queue = queue.clone();
            let state = state.clone();
            let request_id = request_id.clone();
            workers.push(tokio::spawn(async move {
                while let Some(item) = queue.pop().await {
                    coordinator
                        .process_work_item(item, depth_cap, skip_existing, update_graph, dry_run, &request_id, &state, &queue)
                        .await;
                    queue.complete_one();
                }
            }));
        }
        for worker in workers {
            let _ = worker.await;
        }

        let outcomes = state.outcomes.lock().await.clone();
        CascadeResult {
            origin: request.model,
            request_id,
            total_duration: started.elapsed(),
            outcomes,
            depth_reached: state.depth_reached.load(Ordering::SeqCst),
            cycles_skipped: state.cycles_skipped.load(Ordering::SeqCst),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_work_item(
        &self,
        item: WorkItem,
        depth_cap: u32,
        skip_existing: bool,
        update_graph: bool,
        dry_run: bool,
        request_id: &str,
        state: &CascadeState,
        queue: &WorkQueue<WorkItem>,
    ) {
        let ids = if skip_existing { self.filter_existing(item.target_model_id, item.ids).await } else { item.ids };
        if ids.is_empty() {
            return;
        }
        let domain = Domain::for_ids(ids).without_date_window();
        self.sync_one(&item.target_model, domain, SyncType::Targeted, item.depth, request_id, update_graph, dry_run, depth_cap, state, queue)
            .await;
    }

    /// Removes ids already present in the sink, so a dependency sub-sync
    /// only re-fetches records genuinely missing.
    async fn filter_existing(&self, target_model_id: u16, ids: Vec<u64>) -> Vec<u64> {
        let mut missing = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(EXISTENCE_PROBE_CHUNK) {
            let point_ids: Vec<PointId> = chunk.iter().map(|id| data_id(target_model_id, *id)).collect();
            let found: HashSet<PointId> = match self.ctx.sink.retrieve(&point_ids).await {
                Ok(records) => records.into_iter().map(|r| r.id).collect(),
                Err(_) => HashSet::new(),
            };
            for (id, point_id) in chunk.iter().zip(point_ids.iter()) {
                if !found.contains(point_id) {
                    missing.push(*id);
                }
            }
        }
        missing
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_one(
        &self,
        model: &str,
        domain: Domain,
        sync_type: SyncType,
        depth: u32,
        request_id: &str,
        update_graph: bool,
        dry_run: bool,
        depth_cap: u32,
        state: &CascadeState,
        queue: &WorkQueue<WorkItem>,
    ) {
        if state.outcomes.lock().await.contains_key(model) {
            return;
        }

        let guard = match self.locks.try_acquire(model) {
            Ok(guard) => guard,
            Err(contention) => {
                state.outcomes.lock().await.insert(
                    model.to_string(),
                    SyncOutcome::AlreadyInProgress { model: model.to_string(), elapsed: contention.elapsed, progress: contention.progress },
                );
                return;
            }
        };
        self.locks.set_progress(model, "extracting");

        let plan = ModelSyncPlan { model: model.to_string(), domain, sync_type, depth, cascade_source: request_id.to_string(), dry_run };
        let output = match run_model_sync(&self.ctx, &plan).await {
            Ok(output) => output,
            Err(e) => {
                drop(guard);
                state
                    .outcomes
                    .lock()
                    .await
                    .insert(model.to_string(), SyncOutcome::Completed(ModelSyncResult::failed(model, sync_type, e.to_string())));
                return;
            }
        };
        drop(guard);

        state.depth_reached.fetch_max(depth, Ordering::SeqCst);

        if update_graph {
            self.materialize_edges(model, depth, request_id, &output.fk_accumulator).await;
        }

        let mut result = output.result;
        result.dependency_models = output.fk_accumulator.entries().map(|e| e.target_model.clone()).collect();

        if depth < depth_cap {
            for entry in output.fk_accumulator.into_entries() {
                if entry.unique_targets.is_empty() {
                    continue;
                }
                let mut fresh = Vec::with_capacity(entry.unique_targets.len());
                {
                    let mut visited = state.visited.lock().await;
                    for id in entry.unique_targets {
                        if visited.insert((entry.target_model.clone(), id)) {
                            fresh.push(id);
                        } else {
                            state.cycles_skipped.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
                if fresh.is_empty() {
                    continue;
                }
                queue
                    .push(WorkItem { target_model: entry.target_model, target_model_id: entry.target_model_id, ids: fresh, depth: depth + 1 })
                    .await;
            }
        }

        state.outcomes.lock().await.insert(model.to_string(), SyncOutcome::Completed(result));
    }

    async fn materialize_edges(&self, model: &str, depth: u32, request_id: &str, fk_accumulator: &crate::accumulator::FkAccumulator) {
        let Some(source_model_id) = self.ctx.registry.model_id(model) else { return };
        for entry in fk_accumulator.entries() {
            let input = UpsertInput {
                source_model: model.to_string(),
                source_model_id,
                field_id: entry.field_id,
                field_name: entry.field_name.clone(),
                field_label: entry.field_label.clone(),
                relation_kind: entry.relation_kind,
                target_model: entry.target_model.clone(),
                target_model_id: entry.target_model_id,
                depth_from_origin: depth,
                observed_edge_count: entry.total_references,
                observed_unique_targets: entry.unique_targets.len() as u64,
                cascade_source: request_id.to_string(),
            };
            if let Err(e) = self.graph.upsert_relationship(input).await {
                tracing::warn!(model, field = %entry.field_name, error = %e, "failed to materialize graph edge");
            }
        }
        if fk_accumulator.is_empty() {
            if let Err(e) = self.graph.mark_leaf(model).await {
                tracing::warn!(model, error = %e, "failed to mark leaf edges");
            }
        }
    }
}

#[async_trait]
impl AutoSyncer for Coordinator {
    /// Bounded healer entry point: syncs exactly the given ids for
    /// `target_model` with no further FK expansion (spec §4.8's `--fix`
    /// path pulling in orphaned FK targets).
    async fn sync_missing(&self, target_model: &str, ids: &[PointId]) -> Result<(), String> {
        let record_ids: Vec<u64> = ids.iter().filter_map(|id| cascade_core::ids::parse_data_id(*id)).map(|(_, record_id)| record_id).collect();
        if record_ids.is_empty() {
            return Ok(());
        }
        let mut request = CascadeRequest::new(target_model, format!("healer-{}", Utc::now().timestamp_millis()));
        request.record_ids = Some(record_ids);
        request.depth_cap_override = Some(0);
        request.parallel_targets = Some(1);

        let result = self.run(request).await;
        if result.had_errors() {
            return Err(format!("auto-sync of {target_model} completed with errors"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as at;
    use cascade_core::schema::{Field, FieldType, Model, SchemaRegistry};
    use cascade_core::Service;
    use cascade_embeddings::{EmbedError, Embedder, Role};
    use cascade_qdrant::{IndexKind, PointRecord, ScrollPage, SinkError, SinkFilter, VectorSink};
    use cascade_resilience::{CircuitBreaker, CircuitBreakerConfig, DeadLetterQueue};
    use cascade_upstream::{Batch, Extractor, Record, UpstreamClient, UpstreamError};
    use parking_lot::Mutex as SyncStdMutex;
    use serde_json::{json, Value as JsonValue};
    use std::collections::HashMap as StdHashMap;
    use tempfile::tempdir;

    struct FakeSink {
        points: SyncStdMutex<StdHashMap<PointId, PointRecord>>,
    }

    impl FakeSink {
        fn new() -> Self {
            Self { points: SyncStdMutex::new(StdHashMap::new()) }
        }
    }

    #[at]
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

        async fn search(&self, _vector: &[f32], _filter: Option<&SinkFilter>, _k: u64) -> Result<Vec<(PointRecord, f32)>, SinkError> {
            Ok(Vec::new())
        }
    }

    fn matches_filter(record: &PointRecord, filter: Option<&SinkFilter>) -> bool {
        let Some(filter) = filter else { return true };
        filter.conditions.iter().all(|condition| match condition {
            cascade_qdrant::FilterCondition::Equals { field, value } => {
                record.payload.get(field).map(|v| scalar_matches(v, value)).unwrap_or(false)
            }
            _ => true,
        })
    }

    fn scalar_matches(json: &JsonValue, value: &cascade_qdrant::ScalarValue) -> bool {
        match value {
            cascade_qdrant::ScalarValue::Str(s) => json.as_str() == Some(s.as_str()),
            cascade_qdrant::ScalarValue::Int(i) => json.as_i64() == Some(*i),
            cascade_qdrant::ScalarValue::Bool(b) => json.as_bool() == Some(*b),
        }
    }

    struct FakeEmbedder;

    #[at]
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

    struct FakeUpstream {
        rows: Vec<Record>,
    }

    #[at]
    impl UpstreamClient for FakeUpstream {
        async fn count(&self, _model: &str, _domain: &Domain) -> Result<u64, UpstreamError> {
            Ok(self.rows.len() as u64)
        }

        async fn search_read(
            &self,
            _model: &str,
            _domain: &Domain,
            fields: &[String],
            offset: u64,
            limit: u64,
        ) -> Result<Batch, UpstreamError> {
            let records: Vec<Record> = self
                .rows
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .map(|row| row.iter().filter(|(k, _)| fields.contains(k) || *k == "id").map(|(k, v)| (k.clone(), v.clone())).collect())
                .collect();
            Ok(Batch { records, total: self.rows.len() as u64 })
        }
    }

    fn lead_registry() -> SchemaRegistry {
        let lead = Model {
            name: "crm.lead".to_string(),
            id: 1,
            fields: vec![Field {
                id: 7,
                name: "partner_id".to_string(),
                label: "Customer".to_string(),
                field_type: FieldType::ReferenceSingle,
                is_derived: false,
                payload_enabled: true,
                fk_target_model: Some("res.partner".to_string()),
                fk_target_model_id: Some(2),
            }],
        };
        let partner = Model { name: "res.partner".to_string(), id: 2, fields: vec![] };
        SchemaRegistry::new(vec![lead, partner], HashSet::new())
    }

    fn test_context(rows: Vec<Record>, sink: Arc<dyn VectorSink>) -> Arc<PipelineContext> {
        let registry = Arc::new(lead_registry());
        let extractor = Arc::new(Extractor::new(Arc::new(FakeUpstream { rows })));
        let dir = tempdir().unwrap();
        Arc::new(PipelineContext {
            extractor,
            embedder: Arc::new(FakeEmbedder),
            sink,
            registry,
            patterns: Arc::new(HashMap::new()),
            dlq: Arc::new(DeadLetterQueue::new(dir.path().join("dlq.jsonl"))),
            extractor_breaker: Arc::new(CircuitBreaker::new(Service::Extractor, CircuitBreakerConfig::default())),
            embedder_breaker: Arc::new(CircuitBreaker::new(Service::Embedder, CircuitBreakerConfig::default())),
            sink_breaker: Arc::new(CircuitBreaker::new(Service::VectorSink, CircuitBreakerConfig::default())),
            batch_size: 50,
        })
    }

    fn lead_row(id: u64, partner_id: i64) -> Record {
        let mut record: Record = Record::new();
        record.insert("id".to_string(), json!(id));
        record.insert("partner_id".to_string(), json!(partner_id));
        record
    }

    #[tokio::test]
    async fn run_materializes_an_edge_for_the_origin_models_fk_field() {
        let sink: Arc<dyn VectorSink> = Arc::new(FakeSink::new());
        let ctx = test_context(vec![lead_row(1, 100), lead_row(2, 101)], sink.clone());
        let graph = Arc::new(GraphStore::new(sink, Arc::new(FakeEmbedder)));
        let coordinator = Coordinator::new(ctx, graph.clone(), Arc::new(SyncLockRegistry::new()), CascadeConfig::default().with_depth_cap(0));

        let result = coordinator.run(CascadeRequest::new("crm.lead", "t1")).await;

        let SyncOutcome::Completed(origin) = result.origin_outcome().unwrap() else { panic!("expected completed origin") };
        assert_eq!(origin.records_fetched, 2);
        assert_eq!(origin.dependency_models, vec!["res.partner".to_string()]);
        assert_eq!(graph.outgoing_of("crm.lead").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn contended_lock_reports_already_in_progress() {
        let sink: Arc<dyn VectorSink> = Arc::new(FakeSink::new());
        let ctx = test_context(vec![], sink.clone());
        let graph = Arc::new(GraphStore::new(sink, Arc::new(FakeEmbedder)));
        let locks = Arc::new(SyncLockRegistry::new());
        let coordinator = Coordinator::new(ctx, graph, locks.clone(), CascadeConfig::default());

        let held = locks.try_acquire("crm.lead").unwrap();
        let result = coordinator.run(CascadeRequest::new("crm.lead", "t2")).await;
        drop(held);

        assert!(matches!(result.origin_outcome(), Some(SyncOutcome::AlreadyInProgress { .. })));
    }

    #[test]
    fn request_id_is_stable_for_the_same_model_and_token() {
        assert_eq!(Coordinator::request_id("crm.lead", "abc"), Coordinator::request_id("crm.lead", "abc"));
        assert_ne!(Coordinator::request_id("crm.lead", "abc"), Coordinator::request_id("crm.lead", "def"));
    }
}
