//! `cascade sync pipeline <model> [--date-from ...] [--date-to ...]
//! [--record-ids ...] [--skip-existing] [--parallel N] [--dry-run]
//! [--update-graph]` (spec §6).

use std::sync::Arc;

use clap::Args;
use serde_json::json;

use cascade_cascade::{CascadeResult, CascadeRequest, Coordinator, SyncOutcome};

use crate::output::{create_table, format_duration, print_error, print_success, print_warning, OutputFormat};
use crate::sync_store::SyncStore;

#[derive(Args)]
pub struct SyncPipelineArgs {
    /// Origin model's technical name, e.g. `crm.lead`.
    pub model: String,

    #[arg(long)]
    pub date_from: Option<String>,

    #[arg(long)]
    pub date_to: Option<String>,

    /// Restricts the origin sync to these record ids (suppresses the
    /// watermark predicate; spec §4.2).
    #[arg(long, value_delimiter = ',')]
    pub record_ids: Vec<u64>,

    /// Subtracts ids already present in the sink before a dependency
    /// sub-sync (default on; pass `--skip-existing=false` to force re-fetch).
    #[arg(long)]
    pub skip_existing: Option<bool>,

    /// Worker-pool width for dependency expansion, clamped to 1..=10.
    #[arg(long)]
    pub parallel: Option<u8>,

    /// Runs the pipeline without issuing embed/upsert calls.
    #[arg(long)]
    pub dry_run: bool,

    /// Materializes graph edges after the primary sync (default on).
    #[arg(long)]
    pub update_graph: Option<bool>,

    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Drives one cascade run and renders its [`CascadeResult`].
pub async fn run(args: SyncPipelineArgs, coordinator: Arc<Coordinator>, sync_store: Arc<SyncStore>) -> i32 {
    let mut request = CascadeRequest::new(args.model.clone(), token());
    request.date_from = args.date_from;
    request.date_to = args.date_to;
    if !args.record_ids.is_empty() {
        request.record_ids = Some(args.record_ids);
    } else {
        match sync_store.load(&args.model).await {
            Ok(metadata) if metadata.record_count > 0 => {
                request.incremental_since = Some(metadata.last_sync);
            }
            Ok(_) => {}
            Err(e) => print_warning(&format!("could not read prior sync metadata for {}: {e}", args.model)),
        }
    }
    request.skip_existing = args.skip_existing;
    request.parallel_targets = args.parallel;
    request.dry_run = args.dry_run;
    request.update_graph = args.update_graph.unwrap_or(true);

    let result = coordinator.run(request).await;

    if let Some(SyncOutcome::Completed(origin)) = result.origin_outcome() {
        if !origin.dry_run {
            let mut metadata = sync_store.load(&args.model).await.unwrap_or_else(|_| cascade_upstream::SyncMetadata::new(&args.model));
            metadata.record_count += origin.records_upserted;
            metadata.last_sync = chrono::Utc::now();
            if let Err(e) = sync_store.save(&metadata).await {
                print_warning(&format!("failed to persist sync metadata: {e}"));
            }
        }
    }

    let exit_code = exit_code_for(&result);

    match args.format {
        OutputFormat::Json => println!("{}", render_json(&result)),
        OutputFormat::Table => render_table(&result),
    }

    exit_code
}

fn token() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("{nanos:x}")
}

fn exit_code_for(result: &CascadeResult) -> i32 {
    match result.origin_outcome() {
        Some(SyncOutcome::Completed(origin)) => {
            if origin.errors.iter().any(|e| e.contains("circuit open")) {
                2
            } else if origin.records_failed > 0 {
                3
            } else {
                0
            }
        }
        Some(SyncOutcome::AlreadyInProgress { .. }) => 1,
        None => 64,
    }
}

fn render_json(result: &CascadeResult) -> serde_json::Value {
    let models: Vec<serde_json::Value> = result
        .outcomes
        .values()
        .map(|outcome| match outcome {
            SyncOutcome::Completed(r) => json!({
                "model": r.model,
                "sync_type": r.sync_type.to_string(),
                "depth": r.depth,
                "records_fetched": r.records_fetched,
                "records_upserted": r.records_upserted,
                "records_failed": r.records_failed,
                "duration_micros": r.duration.as_micros() as u64,
                "restricted_fields": r.restricted_fields,
                "dependency_models": r.dependency_models,
                "errors": r.errors,
                "dry_run": r.dry_run,
            }),
            SyncOutcome::AlreadyInProgress { model, elapsed, progress } => json!({
                "model": model,
                "already_in_progress": true,
                "elapsed_micros": elapsed.as_micros() as u64,
                "progress": progress,
            }),
        })
        .collect();
    json!({
        "origin": result.origin,
        "request_id": result.request_id,
        "duration_micros": result.total_duration.as_micros() as u64,
        "depth_reached": result.depth_reached,
        "cycles_skipped": result.cycles_skipped,
        "models": models,
    })
}

fn render_table(result: &CascadeResult) {
    match result.origin_outcome() {
        Some(SyncOutcome::AlreadyInProgress { model, elapsed, progress }) => {
            print_error(&format!("{model} sync already in progress ({}, {progress})", format_duration(elapsed.as_micros())));
            return;
        }
        Some(SyncOutcome::Completed(_)) => {}
        None => {
            print_error("no outcome recorded for the origin model");
            return;
        }
    }

    let mut table = create_table(vec!["model", "type", "depth", "fetched", "upserted", "failed", "duration", "errors"]);
    let mut rows: Vec<_> = result.outcomes.values().collect();
    rows.sort_by_key(|o| match o {
        SyncOutcome::Completed(r) => (r.depth, r.model.clone()),
        SyncOutcome::AlreadyInProgress { model, .. } => (0, model.clone()),
    });
    for outcome in rows {
        match outcome {
            SyncOutcome::Completed(r) => {
                table.add_row(vec![
                    r.model.clone(),
                    r.sync_type.to_string(),
                    r.depth.to_string(),
                    r.records_fetched.to_string(),
                    r.records_upserted.to_string(),
                    r.records_failed.to_string(),
                    format_duration(r.duration.as_micros()),
                    r.errors.len().to_string(),
                ]);
            }
            SyncOutcome::AlreadyInProgress { model, .. } => {
                table.add_row(vec![model.clone(), "-".to_string(), "-".to_string(), "-".to_string(), "-".to_string(), "-".to_string(), "-".to_string(), "locked".to_string()]);
            }
        }
    }
    println!("{table}");
    print_success(&format!(
        "cascade from {} reached depth {} in {} ({} models, {} cycles skipped)",
        result.origin,
        result.depth_reached,
        format_duration(result.total_duration.as_micros()),
        result.outcomes.len(),
        result.cycles_skipped
    ));
}
