//! Thin wrapper over the `metrics` facade crate for the counters/histograms
//! named in spec §4.10: per-model sync counts, durations, records
//! processed/embedded, per-section adapter timings, circuit-breaker state
//! changes. The CLI binary installs a recorder (e.g.
//! `metrics-exporter-prometheus`); library crates only record through this
//! passive facade, never install one themselves (mirrors how
//! `dashflow-observability` keeps exporter installation in the binary).

use std::time::Duration;

/// Records that one batch of `count` records finished a sync stage for `model`.
pub fn record_batch(model: &str, stage: &str, count: usize, elapsed: Duration) {
    metrics::counter!("cascade_records_total", "model" => model.to_string(), "stage" => stage.to_string())
        .increment(count as u64);
    metrics::histogram!("cascade_stage_duration_seconds", "model" => model.to_string(), "stage" => stage.to_string())
        .record(elapsed.as_secs_f64());
}

/// Records that a full model sync finished.
pub fn record_model_sync(model: &str, sync_type: &str, elapsed: Duration) {
    metrics::counter!("cascade_model_syncs_total", "model" => model.to_string(), "sync_type" => sync_type.to_string())
        .increment(1);
    metrics::histogram!("cascade_model_sync_duration_seconds", "model" => model.to_string())
        .record(elapsed.as_secs_f64());
}

/// Records a validation pass outcome for `model`.
pub fn record_validation(model: &str, integrity_score: f64) {
    metrics::histogram!("cascade_validation_integrity_score", "model" => model.to_string())
        .record(integrity_score);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facade_calls_do_not_panic_without_an_installed_recorder() {
        record_batch("lead", "upsert", 10, Duration::from_millis(5));
        record_model_sync("lead", "incremental", Duration::from_secs(1));
        record_validation("lead", 98.5);
    }
}
