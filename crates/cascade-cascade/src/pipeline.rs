//! The primary sync pipeline: Extract -> Transform -> Embed -> Upsert, with
//! the next page's extraction overlapping the current page's embed/upsert
//! (spec §4.6 step 2, "Primary sync", and §5, "batch N+1 extraction runs
//! concurrently with batch N's embed/upsert").
//!
//! One call to [`run_model_sync`] drives exactly one model, whether that's
//! the cascade's origin or a dependency sub-sync; the caller decides the
//! [`Domain`] and depth.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use cascade_core::schema::FkField;
use cascade_core::{
    ids, transform, DataPointPayload, Error as CoreError, Model, Pattern, Point, RestrictedFields, SchemaRegistry,
};
use cascade_embeddings::{Embedder, Role};
use cascade_qdrant::{PointRecord, VectorSink};
use cascade_resilience::{metrics_facade, CircuitBreaker, DeadLetterQueue, DlqEntry, FailureStage};
use cascade_upstream::{Domain, ExtractError, Extractor, NewlyRestrictedField, ResilientOptions, WatermarkAccumulator};

use crate::accumulator::FkAccumulator;
use crate::config::DEFAULT_BATCH_SIZE;
use crate::result::{ModelSyncResult, SyncType};

/// Bound on restricted-field warnings retained per model sync (spec §4.6,
/// "field-restriction warnings are bounded at 100 entries then silently dropped").
const MAX_RESTRICTION_WARNINGS: usize = 100;

/// Collaborators shared by every model sync in a cascade run.
pub struct PipelineContext {
    pub extractor: Arc<Extractor>,
    pub embedder: Arc<dyn Embedder>,
    pub sink: Arc<dyn VectorSink>,
    pub registry: Arc<SchemaRegistry>,
    pub patterns: Arc<HashMap<String, Pattern>>,
    pub dlq: Arc<DeadLetterQueue>,
    pub extractor_breaker: Arc<CircuitBreaker>,
    pub embedder_breaker: Arc<CircuitBreaker>,
    pub sink_breaker: Arc<CircuitBreaker>,
    pub batch_size: u64,
}

impl PipelineContext {
    #[must_use]
    pub fn batch_size(&self) -> u64 {
        if self.batch_size == 0 { DEFAULT_BATCH_SIZE } else { self.batch_size }
    }
}

/// What to sync and how deep it sits in the cascade.
#[derive(Debug, Clone)]
pub struct ModelSyncPlan {
    pub model: String,
    pub domain: Domain,
    pub sync_type: SyncType,
    pub depth: u32,
    pub cascade_source: String,
    pub dry_run: bool,
}

/// Result of driving one model through the pipeline.
pub struct PipelineOutput {
    pub result: ModelSyncResult,
    pub fk_accumulator: FkAccumulator,
}

/// Outcome of the prefetch side of one loop iteration.
enum NextPage {
    /// The batch just processed was the last one.
    Done,
    /// The extractor circuit opened before the next page could be read.
    CircuitOpen,
    Fetched(cascade_upstream::Batch, Vec<NewlyRestrictedField>),
    Failed(ExtractError),
}

/// Runs the Extract -> Transform -> Embed -> Upsert pipeline for one model.
///
/// # Errors
///
/// Fails only when the model cannot be resolved in the schema registry at
/// all; every other failure (extractor circuit open, embedder/sink
/// failures, field restrictions) is folded into the returned result's
/// `errors` so the cascade can keep going with partial results (spec §4.6,
/// "Extractor circuit-open aborts the sync gracefully with partial results").
pub async fn run_model_sync(ctx: &PipelineContext, plan: &ModelSyncPlan) -> Result<PipelineOutput, CoreError> {
    let started = Instant::now();
    let model_id = ctx.registry.model_id(&plan.model).ok_or_else(|| CoreError::SchemaMissing {
        model: plan.model.clone(),
        suggestions: ctx.registry.suggest_models(&plan.model, 3),
    })?;
    let fields = ctx.registry.fields_of(&plan.model).to_vec();
    let model = Model { name: plan.model.clone(), id: model_id, fields };
    let fk_fields = ctx.registry.fk_fields_of(&plan.model);
    let projection: Vec<String> =
        model.fields.iter().filter(|f| f.payload_enabled).map(|f| f.name.clone()).collect();
    let pattern = ctx.patterns.get(&plan.model);

    let mut result = ModelSyncResult::new(plan.model.clone(), plan.sync_type, plan.depth, plan.dry_run);
    let mut restricted = RestrictedFields::new();
    let mut fk_acc = FkAccumulator::new();
    let mut watermark_acc = WatermarkAccumulator::new();
    let batch_size = ctx.batch_size();

    if !plan.dry_run && !ctx.extractor_breaker.try_acquire() {
        result.errors.push("extractor circuit open; sync aborted before any records were read".to_string());
        result.duration = started.elapsed();
        return Ok(PipelineOutput { result, fk_accumulator: fk_acc });
    }

    let mut offset = 0u64;
    let mut batch_number = 0u64;
    let opts = ResilientOptions::default();

    let mut current = match fetch_page(ctx, &plan.model, &plan.domain, &projection, &mut restricted, &opts, offset, batch_size).await
    {
        Ok((batch, newly)) => {
            push_restriction_warnings(&newly, &mut result);
            batch
        }
        Err(e) => {
            on_extract_error(ctx, &e, &mut result);
            result.duration = started.elapsed();
            return Ok(PipelineOutput { result, fk_accumulator: fk_acc });
        }
    };

    loop {
        batch_number += 1;
        let total = current.total;
        let fetched_so_far = offset + current.records.len() as u64;
        let exhausted = current.records.is_empty() || fetched_so_far >= total;
        let next_offset = offset + batch_size;

        let restricted_snapshot = restricted.clone();
        let records = std::mem::take(&mut current.records);

        let extract_next = async {
            if exhausted {
                NextPage::Done
            } else if !plan.dry_run && !ctx.extractor_breaker.try_acquire() {
                NextPage::CircuitOpen
            } else {
                match fetch_page(ctx, &plan.model, &plan.domain, &projection, &mut restricted, &opts, next_offset, batch_size)
                    .await
                {
                    Ok((batch, newly)) => NextPage::Fetched(batch, newly),
                    Err(e) => NextPage::Failed(e),
                }
            }
        };

        let process_current = process_batch(
            ctx,
            &model,
            &fk_fields,
            restricted_snapshot,
            pattern,
            records,
            batch_number,
            plan.dry_run,
            &mut fk_acc,
            &mut watermark_acc,
        );

        let (next_result, (batch_fetched, batch_upserted, batch_failed, mut batch_errors)) =
            tokio::join!(extract_next, process_current);

        result.records_fetched += batch_fetched;
        result.records_upserted += batch_upserted;
        result.records_failed += batch_failed;
        result.errors.append(&mut batch_errors);

        match next_result {
            NextPage::Done => break,
            NextPage::CircuitOpen => {
                result.errors.push("extractor circuit open; remaining pages were not read".to_string());
                break;
            }
            NextPage::Fetched(batch, newly) => {
                push_restriction_warnings(&newly, &mut result);
                current = batch;
                offset = next_offset;
            }
            NextPage::Failed(e) => {
                on_extract_error(ctx, &e, &mut result);
                break;
            }
        }
    }

    let _ = watermark_acc; // retained for host-side persistence via into_metadata; no-op here.
    result.duration = started.elapsed();
    if !plan.dry_run {
        metrics_facade::record_model_sync(&plan.model, &plan.sync_type.to_string(), result.duration);
    }
    Ok(PipelineOutput { result, fk_accumulator: fk_acc })
}

fn on_extract_error(ctx: &PipelineContext, error: &ExtractError, result: &mut ModelSyncResult) {
    match error {
        ExtractError::Transport(_) => {
            ctx.extractor_breaker.record_failure();
            result.errors.push(format!("sync aborted: {error}"));
        }
        ExtractError::RetriesExhausted { .. } => {
            result.errors.push(format!("sync aborted: {error}"));
        }
    }
}

async fn fetch_page(
    ctx: &PipelineContext,
    model: &str,
    domain: &Domain,
    fields: &[String],
    restricted: &mut RestrictedFields,
    opts: &ResilientOptions,
    offset: u64,
    limit: u64,
) -> Result<(cascade_upstream::Batch, Vec<NewlyRestrictedField>), ExtractError> {
    let mut warned: Vec<NewlyRestrictedField> = Vec::new();
    let mut on_restriction = |f: &NewlyRestrictedField| warned.push(f.clone());
    let (batch, _retries) = ctx
        .extractor
        .resilient_search_read(model, domain, fields, restricted, opts, Some(&mut on_restriction), offset, limit)
        .await?;
    ctx.extractor_breaker.record_success();
    Ok((batch, warned))
}

fn push_restriction_warnings(newly: &[NewlyRestrictedField], result: &mut ModelSyncResult) {
    for field in newly {
        if result.restricted_fields.len() >= MAX_RESTRICTION_WARNINGS {
            break;
        }
        if !result.restricted_fields.contains(&field.field) {
            result.restricted_fields.push(field.field.clone());
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_batch(
    ctx: &PipelineContext,
    model: &Model,
    fk_fields: &[FkField],
    restricted_snapshot: RestrictedFields,
    pattern: Option<&Pattern>,
    records: Vec<cascade_upstream::Record>,
    batch_number: u64,
    dry_run: bool,
    fk_acc: &mut FkAccumulator,
    watermark_acc: &mut WatermarkAccumulator,
) -> (u64, u64, u64, Vec<String>) {
    let batch_started = Instant::now();
    let mut errors = Vec::new();
    if records.is_empty() {
        return (0, 0, 0, errors);
    }
    let fetched = records.len() as u64;

    let mut outputs = Vec::with_capacity(records.len());
    for raw in &records {
        let out = transform(raw, model, &ctx.registry, &restricted_snapshot, pattern);
        for fk in fk_fields {
            fk_acc.observe(fk, &out.fields);
        }
        if let Some(write_date) = raw.get("write_date").and_then(parse_datetime) {
            watermark_acc.observe(write_date);
        }
        let record_id = raw.get("id").and_then(JsonValue::as_u64).unwrap_or_default();
        outputs.push((record_id, out));
    }

    if dry_run {
        return (fetched, fetched, 0, errors);
    }

    if !ctx.embedder_breaker.try_acquire() {
        dead_letter_all(ctx, model, &outputs, FailureStage::Embedding, "embedder circuit open", batch_number).await;
        errors.push(format!("batch {batch_number}: embedder circuit open, {fetched} records dead-lettered"));
        return (fetched, 0, fetched, errors);
    }

    let texts: Vec<String> = outputs.iter().map(|(_, o)| o.vector_text.clone()).collect();
    let vectors = match ctx.embedder.embed_batch(&texts, Role::Document).await {
        Ok(v) => {
            ctx.embedder_breaker.record_success();
            v
        }
        Err(e) => {
            ctx.embedder_breaker.record_failure();
            dead_letter_all(ctx, model, &outputs, FailureStage::Embedding, &e.to_string(), batch_number).await;
            errors.push(format!("batch {batch_number}: embedding failed: {e}"));
            return (fetched, 0, fetched, errors);
        }
    };

    if !ctx.sink_breaker.try_acquire() {
        dead_letter_all(ctx, model, &outputs, FailureStage::Upsert, "vector sink circuit open", batch_number).await;
        errors.push(format!("batch {batch_number}: vector sink circuit open, {fetched} records dead-lettered"));
        return (fetched, 0, fetched, errors);
    }

    let mut points = Vec::with_capacity(outputs.len());
    let mut serialize_failures = 0u64;
    for ((record_id, out), vector) in outputs.iter().zip(vectors.into_iter()) {
        let payload = DataPointPayload {
            model_name: model.name.clone(),
            model_id: model.id,
            record_id: *record_id,
            sync_timestamp: Utc::now(),
            fields: out.fields.clone(),
            vector_text: out.vector_text.clone(),
            graph_refs: out.graph_refs.clone(),
        };
        match serde_json::to_value(Point::Data(payload)) {
            Ok(json) => points.push(PointRecord::new(ids::data_id(model.id, *record_id), vector, json)),
            Err(e) => {
                serialize_failures += 1;
                errors.push(format!("record {record_id} dropped: {e}"));
            }
        }
    }

    match ctx.sink.upsert(points).await {
        Ok(()) => {
            ctx.sink_breaker.record_success();
            metrics_facade::record_batch(&model.name, "upsert", outputs.len(), batch_started.elapsed());
            (fetched, fetched - serialize_failures, serialize_failures, errors)
        }
        Err(e) => {
            ctx.sink_breaker.record_failure();
            dead_letter_all(ctx, model, &outputs, FailureStage::Upsert, &e.to_string(), batch_number).await;
            errors.push(format!("batch {batch_number}: upsert failed: {e}"));
            (fetched, 0, fetched, errors)
        }
    }
}

async fn dead_letter_all(
    ctx: &PipelineContext,
    model: &Model,
    outputs: &[(u64, cascade_core::transformer::TransformOutput)],
    stage: FailureStage,
    message: &str,
    batch_number: u64,
) {
    for (record_id, out) in outputs {
        let entry = DlqEntry {
            record_id: *record_id,
            model: model.name.clone(),
            model_id: model.id,
            failure_stage: stage,
            error_message: message.to_string(),
            batch_number,
            encoded_text: out.vector_text.clone(),
            failed_at: Utc::now(),
            retry_count: 0,
        };
        if let Err(e) = ctx.dlq.append(&entry).await {
            tracing::warn!(model = %model.name, record_id, "failed to dead-letter record: {e}");
        }
    }
}

fn parse_datetime(value: &JsonValue) -> Option<DateTime<Utc>> {
    value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|dt| dt.with_timezone(&Utc))
}
