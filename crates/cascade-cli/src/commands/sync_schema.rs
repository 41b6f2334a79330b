//! `cascade sync schema --source {excel,upstream} [--force]` (spec §6).
//!
//! Loads a model/field list, diffs it against whatever `point_type=schema`
//! points the sink already holds, and upserts one point per field. With
//! `--force` every field is rewritten even if unchanged; otherwise only
//! fields missing from the sink are added (spec is silent on update-in-
//! place semantics for schema points, so this follows the cheaper,
//! additive default and documents the choice in `DESIGN.md`).

use std::sync::Arc;
use std::time::Instant;

use clap::{Args, ValueEnum};
use serde_json::json;

use cascade_core::ids::schema_id;
use cascade_core::schema::SchemaSource;
use cascade_core::{Model, Point, SchemaPointPayload};
use cascade_embeddings::{Embedder, Role};
use cascade_qdrant::{FilterCondition, PointRecord, ScalarValue, SinkFilter, VectorSink};

use crate::adapters::JsonFileSchemaSource;
use crate::output::{format_duration, print_error, print_info, print_success, OutputFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchemaSourceKind {
    Excel,
    Upstream,
}

#[derive(Args)]
pub struct SyncSchemaArgs {
    #[arg(long, value_enum)]
    pub source: SchemaSourceKind,

    /// Path to the JSON sidecar for `--source excel` (a spreadsheet export).
    #[arg(long)]
    pub schema_file: Option<String>,

    /// Rewrites every field's schema point even if already present.
    #[arg(long)]
    pub force: bool,

    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncSchemaError {
    #[error("--schema-file is required for --source excel")]
    MissingSchemaFile,
    #[error("schema load failed: {0}")]
    Load(String),
    #[error(transparent)]
    Sink(#[from] cascade_qdrant::SinkError),
    #[error(transparent)]
    Embed(#[from] cascade_embeddings::EmbedError),
}

pub async fn run(
    args: SyncSchemaArgs,
    sink: Arc<dyn VectorSink>,
    embedder: Arc<dyn Embedder>,
) -> Result<(), SyncSchemaError> {
    let started = Instant::now();
    let models = load_models(&args).await?;

    let before = schema_point_count(sink.as_ref()).await?;

    let mut upserted = 0u64;
    for model in &models {
        for field in &model.fields {
            let point_id = schema_id(field.id);
            if !args.force {
                let existing = sink.retrieve(&[point_id]).await?;
                if !existing.is_empty() {
                    continue;
                }
            }
            let payload = SchemaPointPayload {
                model_name: model.name.clone(),
                model_id: model.id,
                field_name: field.name.clone(),
                field_label: field.label.clone(),
                field_type: field.field_type,
                payload_enabled: field.payload_enabled,
            };
            let text = format!("{} {} {}", model.name, field.name, field.label);
            let vector = embedder.embed(&text, Role::Document).await?;
            let payload_json = serde_json::to_value(Point::Schema(payload)).unwrap_or(json!({}));
            sink.upsert(vec![PointRecord::new(point_id, vector, payload_json)]).await?;
            upserted += 1;
        }
    }

    let after = schema_point_count(sink.as_ref()).await?;
    let elapsed = started.elapsed();

    match args.format {
        OutputFormat::Json => {
            println!(
                "{}",
                json!({
                    "schema_points_before": before,
                    "schema_points_after": after,
                    "fields_upserted": upserted,
                    "duration_micros": elapsed.as_micros() as u64,
                })
            );
        }
        OutputFormat::Table => {
            print_success(&format!(
                "schema points {before} -> {after} ({upserted} fields upserted in {})",
                format_duration(elapsed.as_micros())
            ));
        }
    }

    Ok(())
}

async fn load_models(args: &SyncSchemaArgs) -> Result<Vec<Model>, SyncSchemaError> {
    match args.source {
        SchemaSourceKind::Excel => {
            let path = args.schema_file.as_ref().ok_or(SyncSchemaError::MissingSchemaFile)?;
            JsonFileSchemaSource::new(path).load().map_err(|e| SyncSchemaError::Load(e.to_string()))
        }
        SchemaSourceKind::Upstream => {
            print_info("live upstream schema introspection is not wired up in this build; pass --source excel with --schema-file");
            print_error("no upstream schema source configured");
            Ok(Vec::new())
        }
    }
}

async fn schema_point_count(sink: &dyn VectorSink) -> Result<u64, cascade_qdrant::SinkError> {
    let filter = SinkFilter::new().with(FilterCondition::Equals { field: "point_type".to_string(), value: ScalarValue::Str("schema".to_string()) });
    sink.count(Some(&filter)).await
}
