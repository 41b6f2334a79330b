//! Dead-letter queue: an append-only JSON-lines log of batches that failed
//! at a specific pipeline stage (spec §4.10, §6 "Persistent state"), in the
//! spirit of how `dashflow-observability`'s exporter modules serialize
//! structured records to a sink. External tooling drains the file; this
//! crate only ever appends.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Pipeline stage at which a record failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The embedder rejected or failed to return a vector for this record.
    Embedding,
    /// The vector sink rejected the upsert.
    Upsert,
}

/// One dead-lettered record (spec §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Upstream record id.
    pub record_id: u64,
    /// Owning model's technical name.
    pub model: String,
    /// Owning model's numeric id.
    pub model_id: u16,
    /// Stage at which the record failed.
    pub failure_stage: FailureStage,
    /// Human-readable error description.
    pub error_message: String,
    /// Batch sequence number within the run that produced this entry.
    pub batch_number: u64,
    /// The text that would have been embedded, kept for replay/inspection.
    pub encoded_text: String,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
    /// How many times this record has previously been retried via drain tooling.
    pub retry_count: u32,
}

/// Error writing to the dead-letter log.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    /// The underlying file I/O failed.
    #[error("dlq I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The entry failed to serialize (should not happen for well-formed entries).
    #[error("dlq serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only writer over a single JSON-lines file, serialized by one
/// internal mutex so concurrent cascade workers never interleave partial
/// lines (spec §5, "The DLQ is append-only; writes are serialized by a
/// single writer").
pub struct DeadLetterQueue {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DeadLetterQueue {
    /// Opens (creating if absent) the DLQ file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    /// The file this queue appends to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry as a single JSON line.
    pub async fn append(&self, entry: &DlqEntry) -> Result<(), DlqError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        metrics::counter!("cascade_dlq_entries_total", "stage" => stage_label(entry.failure_stage)).increment(1);
        tracing::warn!(
            model = %entry.model,
            record_id = entry.record_id,
            stage = stage_label(entry.failure_stage),
            "record dead-lettered"
        );
        Ok(())
    }

    /// Reads back every entry currently in the file, in append order. Used
    /// by external drain tooling and by tests; not on the hot path.
    pub async fn read_all(&self) -> Result<Vec<DlqEntry>, DlqError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(DlqError::from))
            .collect()
    }
}

fn stage_label(stage: FailureStage) -> &'static str {
    match stage {
        FailureStage::Embedding => "embedding",
        FailureStage::Upsert => "upsert",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(record_id: u64) -> DlqEntry {
        DlqEntry {
            record_id,
            model: "lead".to_string(),
            model_id: 344,
            failure_stage: FailureStage::Upsert,
            error_message: "sink unreachable".to_string(),
            batch_number: 1,
            encoded_text: "Acme deal".to_string(),
            failed_at: Utc::now(),
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn append_then_read_all_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path().join("dlq.jsonl"));

        dlq.append(&entry(1)).await.unwrap();
        dlq.append(&entry(2)).await.unwrap();

        let entries = dlq.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].record_id, 1);
        assert_eq!(entries[1].record_id, 2);
    }

    #[tokio::test]
    async fn read_all_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path().join("nope.jsonl"));
        assert!(dlq.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_never_interleave_lines() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = std::sync::Arc::new(DeadLetterQueue::new(dir.path().join("dlq.jsonl")));

        let mut handles = Vec::new();
        for i in 0..20u64 {
            let dlq = dlq.clone();
            handles.push(tokio::spawn(async move { dlq.append(&entry(i)).await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let entries = dlq.read_all().await.unwrap();
        assert_eq!(entries.len(), 20);
    }
}
