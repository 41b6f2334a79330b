//! `cascade validate fk [--model M] [--limit N] [--store-orphans]
//! [--bidirectional] [--fix] [--extract-patterns] [--track-history]
//! [--auto-sync]` (spec §6, §4.8).

use std::sync::Arc;

use clap::Args;
use serde_json::json;

use cascade_validator::{Discrepancy, FkValidator, ModelReport, RunOptions, ValidationReport};

use crate::output::{create_table, print_success, print_warning, OutputFormat};

#[derive(Args)]
pub struct ValidateFkArgs {
    /// Restrict the run to one model.
    #[arg(long)]
    pub model: Option<String>,

    /// Cap on retained orphan samples across the whole run.
    #[arg(long, default_value_t = cascade_validator::DEFAULT_ORPHAN_LIMIT)]
    pub limit: u64,

    /// Persists `orphan_count`/`validation_integrity_score`/samples onto
    /// each edge visited (step 4). Implied by `--fix`/`--bidirectional`.
    #[arg(long)]
    pub store_orphans: bool,

    /// Classifies each edge as `stale_graph`/`orphan_fks`/`both`/consistent.
    #[arg(long)]
    pub bidirectional: bool,

    /// Applies fixes for discrepancies found by `--bidirectional`.
    #[arg(long)]
    pub fix: bool,

    /// Refreshes cardinality fields on every edge visited.
    #[arg(long)]
    pub extract_patterns: bool,

    /// Appends a validation-history entry on every edge visited.
    #[arg(long)]
    pub track_history: bool,

    /// With `--fix`, also re-syncs orphaned FK targets instead of only
    /// flagging them.
    #[arg(long)]
    pub auto_sync: bool,

    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

pub async fn run(args: ValidateFkArgs, validator: Arc<FkValidator>) -> i32 {
    let options = RunOptions {
        model: args.model.clone(),
        bidirectional: args.bidirectional || args.fix,
        fix: args.fix,
        extract_patterns: args.extract_patterns,
        track_history: args.track_history,
        orphan_limit: args.limit,
    };
    let _ = args.auto_sync; // auto-heal is wired into `validator` itself via `with_auto_syncer`.
    let _ = args.store_orphans; // write-back happens unconditionally per spec §4.8 step 4.

    let report = validator.run(&options).await;
    let exit_code = exit_code_for(&report);

    match args.format {
        OutputFormat::Json => println!("{}", render_json(&report)),
        OutputFormat::Table => render_table(&report),
    }

    exit_code
}

fn exit_code_for(report: &ValidationReport) -> i32 {
    if report.models.iter().any(|m| matches!(m, ModelReport::Failed { .. })) {
        return 64;
    }
    if report.total_orphans() > 0 {
        return 0; // orphans are not sync failures (spec §7, "returns success=true... sets integrity < 100")
    }
    0
}

fn render_json(report: &ValidationReport) -> serde_json::Value {
    let models: Vec<serde_json::Value> = report
        .models
        .iter()
        .map(|m| match m {
            ModelReport::Ok { model, fields } => json!({
                "model": model,
                "fields": fields.iter().map(|f| json!({
                    "field_name": f.field_name,
                    "target_model": f.target_model,
                    "graph_metadata_used": f.graph_metadata_used,
                    "actual_fk_count": f.actual_fk_count,
                    "actual_unique_targets": f.actual_unique_targets,
                    "edge_count": f.edge_count,
                    "orphan_count": f.orphan_count,
                    "integrity_score": f.integrity_score,
                    "discrepancy": discrepancy_label(f.discrepancy),
                    "fixed": f.fixed,
                })).collect::<Vec<_>>(),
            }),
            ModelReport::Failed { model, error } => json!({ "model": model, "error": error }),
        })
        .collect();
    json!({
        "models": models,
        "total_orphans": report.total_orphans(),
        "orphan_samples_truncated": report.orphan_samples_truncated,
        "fix_errors": report.fix_errors,
    })
}

fn discrepancy_label(d: Discrepancy) -> &'static str {
    match d {
        Discrepancy::None => "consistent",
        Discrepancy::StaleGraph => "stale_graph",
        Discrepancy::OrphanFks => "orphan_fks",
        Discrepancy::Both => "both",
    }
}

fn render_table(report: &ValidationReport) {
    let mut table = create_table(vec!["model", "field", "target", "refs", "unique", "edge_count", "orphans", "integrity", "status"]);
    for model_report in &report.models {
        match model_report {
            ModelReport::Ok { model, fields } => {
                for f in fields {
                    table.add_row(vec![
                        model.clone(),
                        f.field_name.clone(),
                        f.target_model.clone(),
                        f.actual_fk_count.to_string(),
                        f.actual_unique_targets.to_string(),
                        f.edge_count.to_string(),
                        f.orphan_count.to_string(),
                        format!("{:.2}", f.integrity_score),
                        discrepancy_label(f.discrepancy).to_string(),
                    ]);
                }
            }
            ModelReport::Failed { model, error } => {
                print_warning(&format!("{model}: {error}"));
            }
        }
    }
    println!("{table}");
    print_success(&format!(
        "{} total orphans across {} models ({} samples truncated by the orphan-budget cap, {} fix errors)",
        report.total_orphans(),
        report.models.len(),
        report.orphan_samples_truncated,
        report.fix_errors,
    ));
}
