//! CRUD and traversal over graph edges (spec §4.7), backed by the same
//! shared point collection as data and schema points.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use cascade_core::ids::graph_id;
use cascade_core::{GraphEdgePayload, OrphanSample, Point, PointId, RelationKind};
use cascade_embeddings::{Embedder, Role};
use cascade_qdrant::{FilterCondition, PointRecord, ScalarValue, SinkFilter, VectorSink};

const SCROLL_PAGE_SIZE: u32 = 200;

/// Failure reading or writing the graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Sink(#[from] cascade_qdrant::SinkError),
    #[error("stored graph point was not valid JSON for GraphEdgePayload: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Embed(#[from] cascade_embeddings::EmbedError),
}

/// Input to [`GraphStore::upsert_relationship`].
#[derive(Debug, Clone)]
pub struct UpsertInput {
    pub source_model: String,
    pub source_model_id: u16,
    pub field_id: u64,
    pub field_name: String,
    pub field_label: String,
    pub relation_kind: RelationKind,
    pub target_model: String,
    pub target_model_id: u16,
    pub depth_from_origin: u32,
    pub observed_edge_count: u64,
    pub observed_unique_targets: u64,
    pub cascade_source: String,
}

/// Graph store over a [`VectorSink`]: edges are points tagged
/// `point_type=graph`, keyed by a derived id so repeated upserts merge
/// rather than duplicate (spec §3, §4.7).
pub struct GraphStore {
    sink: Arc<dyn VectorSink>,
    embedder: Arc<dyn Embedder>,
}

impl GraphStore {
    #[must_use]
    pub fn new(sink: Arc<dyn VectorSink>, embedder: Arc<dyn Embedder>) -> Self {
        Self { sink, embedder }
    }

    fn edge_id_for(&self, source_model_id: u16, target_model_id: u16, kind: RelationKind, field_id: u64) -> PointId {
        graph_id(source_model_id, target_model_id, kind, field_id)
    }

    async fn write_edge(&self, id: PointId, payload: &GraphEdgePayload) -> Result<(), GraphError> {
        let vector = self.embedder.embed(&payload.description, Role::Document).await?;
        let json = serde_json::to_value(Point::Graph(payload.clone()))
            .map_err(|e| GraphError::Corrupt(e.to_string()))?;
        self.sink.upsert(vec![PointRecord::new(id, vector, json)]).await?;
        Ok(())
    }

    fn edge_from_json(value: JsonValue) -> Result<GraphEdgePayload, GraphError> {
        match serde_json::from_value::<Point>(value).map_err(|e| GraphError::Corrupt(e.to_string()))? {
            Point::Graph(edge) => Ok(edge),
            other => Err(GraphError::Corrupt(format!("expected a graph point, found {other:?}"))),
        }
    }

    /// Idempotent upsert: merges counters and extends `cascade_sources` on
    /// an existing edge, or creates a fresh one (spec §4.7).
    pub async fn upsert_relationship(&self, input: UpsertInput) -> Result<PointId, GraphError> {
        let id = self.edge_id_for(input.source_model_id, input.target_model_id, input.relation_kind, input.field_id);
        let mut edge = match self.get(id).await? {
            Some(existing) => existing,
            None => GraphEdgePayload::new(
                input.source_model.clone(),
                input.source_model_id,
                input.field_id,
                input.field_name.clone(),
                input.field_label.clone(),
                input.relation_kind,
                input.target_model.clone(),
                input.target_model_id,
                input.depth_from_origin,
            ),
        };
        edge.merge_counters(input.observed_edge_count, input.observed_unique_targets);
        edge.push_cascade_source(input.cascade_source);
        edge.last_cascade = Some(Utc::now());
        self.write_edge(id, &edge).await?;
        Ok(id)
    }

    /// Fetches one edge by id.
    pub async fn get(&self, id: PointId) -> Result<Option<GraphEdgePayload>, GraphError> {
        let records = self.sink.retrieve(&[id]).await?;
        records.into_iter().next().map(|r| Self::edge_from_json(r.payload)).transpose()
    }

    async fn scroll_all(&self, filter: SinkFilter) -> Result<Vec<GraphEdgePayload>, GraphError> {
        let mut edges = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.sink.scroll(Some(&filter), cursor, SCROLL_PAGE_SIZE).await?;
            for record in page.records {
                edges.push(Self::edge_from_json(record.payload)?);
            }
            match page.next_offset {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(edges)
    }

    fn graph_filter() -> SinkFilter {
        SinkFilter::new().with(FilterCondition::Equals { field: "point_type".into(), value: ScalarValue::Str("graph".into()) })
    }

    /// Every edge where `model` is the source.
    pub async fn outgoing_of(&self, model: &str) -> Result<Vec<GraphEdgePayload>, GraphError> {
        let filter = Self::graph_filter()
            .with(FilterCondition::Equals { field: "source_model".into(), value: ScalarValue::Str(model.to_string()) });
        self.scroll_all(filter).await
    }

    /// Every edge where `model` is the target.
    pub async fn incoming_of(&self, model: &str) -> Result<Vec<GraphEdgePayload>, GraphError> {
        let filter = Self::graph_filter()
            .with(FilterCondition::Equals { field: "target_model".into(), value: ScalarValue::Str(model.to_string()) });
        self.scroll_all(filter).await
    }

    /// Whether `model` has no outgoing edges.
    pub async fn is_leaf(&self, model: &str) -> Result<bool, GraphError> {
        Ok(self.outgoing_of(model).await?.is_empty())
    }

    /// Sets `is_leaf=true` on every edge where `model` is the target.
    pub async fn mark_leaf(&self, model: &str) -> Result<(), GraphError> {
        let edges = self.incoming_of(model).await?;
        for mut edge in edges {
            edge.is_leaf = true;
            let id = self.edge_id_for(edge.source_model_id, edge.target_model_id, edge.relation_kind, edge.field_id);
            self.write_edge(id, &edge).await?;
        }
        Ok(())
    }

    /// Writes validation verdicts (spec §4.7, `UpdateValidation`).
    pub async fn update_validation(
        &self,
        id: PointId,
        validated_at: DateTime<Utc>,
        orphan_count: u64,
        total_refs: u64,
        samples: Vec<OrphanSample>,
    ) -> Result<(), GraphError> {
        let Some(mut edge) = self.get(id).await? else {
            return Ok(());
        };
        edge.update_validation(validated_at, orphan_count, total_refs, samples);
        self.write_edge(id, &edge).await
    }

    /// Overwrites the counters with measured totals (healer's fix path).
    pub async fn update_edge_count(&self, id: PointId, actual_edge_count: u64, actual_unique_targets: u64) -> Result<(), GraphError> {
        let Some(mut edge) = self.get(id).await? else {
            return Ok(());
        };
        edge.set_counters_absolute(actual_edge_count, actual_unique_targets);
        self.write_edge(id, &edge).await
    }

    /// Recomputes cardinality fields from the edge's current counters
    /// without changing them (spec §4.8, `UpdateEdgePatternMetadata`).
    pub async fn refresh_pattern_metadata(&self, id: PointId) -> Result<(), GraphError> {
        let Some(mut edge) = self.get(id).await? else {
            return Ok(());
        };
        edge.set_counters_absolute(edge.edge_count, edge.unique_targets);
        self.write_edge(id, &edge).await
    }

    /// Appends a validation-history entry and recomputes the trend.
    pub async fn append_validation_history(
        &self,
        id: PointId,
        validated_at: DateTime<Utc>,
        integrity_score: f64,
        orphan_count: u64,
    ) -> Result<(), GraphError> {
        let Some(mut edge) = self.get(id).await? else {
            return Ok(());
        };
        edge.append_validation_history(validated_at, integrity_score, orphan_count);
        self.write_edge(id, &edge).await
    }

    /// BFS from `start_model` up to `max_depth` hops, following outgoing
    /// edges, stopping at models already visited (spec §4.7).
    pub async fn traverse(&self, start_model: &str, max_depth: u32) -> Result<TraversalResult, GraphError> {
        let mut visited: HashSet<String> = HashSet::from([start_model.to_string()]);
        let mut nodes_by_depth: Vec<Vec<String>> = vec![vec![start_model.to_string()]];
        let mut edges = Vec::new();
        let mut frontier: VecDeque<String> = VecDeque::from([start_model.to_string()]);
        let mut depth = 0;

        while depth < max_depth && !frontier.is_empty() {
            let mut next_frontier = Vec::new();
            for model in frontier.drain(..) {
                for edge in self.outgoing_of(&model).await? {
                    let is_new = visited.insert(edge.target_model.clone());
                    if is_new {
                        next_frontier.push(edge.target_model.clone());
                    }
                    edges.push(edge);
                }
            }
            depth += 1;
            if next_frontier.is_empty() {
                break;
            }
            nodes_by_depth.push(next_frontier.clone());
            frontier = next_frontier.into();
        }

        Ok(TraversalResult { nodes_by_depth, edges })
    }

    /// Vector search over edges' `description` embedding (spec §4.7).
    pub async fn semantic_search(&self, query: &str, k: u64) -> Result<Vec<(GraphEdgePayload, f32)>, GraphError> {
        let vector = self.embedder.embed(query, Role::Query).await?;
        let filter = Self::graph_filter();
        let hits = self.sink.search(&vector, Some(&filter), k).await?;
        hits.into_iter().map(|(record, score)| Self::edge_from_json(record.payload).map(|edge| (edge, score))).collect()
    }

    /// Aggregate counts and role breakdown across every edge (spec §4.7).
    pub async fn stats(&self) -> Result<GraphStats, GraphError> {
        let edges = self.scroll_all(Self::graph_filter()).await?;
        let mut out_degree: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        let mut in_degree: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        for edge in &edges {
            *out_degree.entry(edge.source_model.clone()).or_insert(0) += 1;
            *in_degree.entry(edge.target_model.clone()).or_insert(0) += 1;
        }
        let mut models: HashSet<String> = HashSet::new();
        models.extend(out_degree.keys().cloned());
        models.extend(in_degree.keys().cloned());

        let mut roles = Vec::with_capacity(models.len());
        let mut most_connected: Option<(String, u64)> = None;
        for model in models {
            let out = *out_degree.get(&model).unwrap_or(&0);
            let inc = *in_degree.get(&model).unwrap_or(&0);
            let total = out + inc;
            let replace = match &most_connected {
                Some((_, best)) => total > *best,
                None => true,
            };
            if replace {
                most_connected = Some((model.clone(), total));
            }
            roles.push((model, crate::role::ModelRole::classify(out, inc)));
        }

        Ok(GraphStats { total_edges: edges.len() as u64, roles, most_connected })
    }
}

/// Result of [`GraphStore::traverse`].
#[derive(Debug, Clone)]
pub struct TraversalResult {
    pub nodes_by_depth: Vec<Vec<String>>,
    pub edges: Vec<GraphEdgePayload>,
}

/// Result of [`GraphStore::stats`].
#[derive(Debug, Clone)]
pub struct GraphStats {
    pub total_edges: u64,
    pub roles: Vec<(String, crate::role::ModelRole)>,
    pub most_connected: Option<(String, u64)>,
}
