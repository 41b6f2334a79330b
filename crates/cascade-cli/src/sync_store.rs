//! Persists [`SyncMetadata`] per model as one JSON file each, written
//! atomically (temp file + rename) so a crash mid-write never leaves a
//! corrupt watermark behind (spec §6, "Persistent state... atomic write
//! then rename"). `cascade-upstream::watermark` only defines the in-memory
//! shape and says persistence is a host concern; this is that host.

use std::path::{Path, PathBuf};

use cascade_upstream::SyncMetadata;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SyncStoreError {
    #[error("sync metadata I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sync metadata serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk mirror of [`SyncMetadata`]; a plain serializable twin since the
/// upstream type itself carries no serde derive (it's the in-memory
/// accumulator's output, not a wire format).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMetadata {
    model: String,
    last_sync: chrono::DateTime<chrono::Utc>,
    record_count: u64,
    oldest_create_date: Option<String>,
    oldest_id: Option<u64>,
    newest_create_date: Option<String>,
    newest_id: Option<u64>,
}

impl From<&SyncMetadata> for StoredMetadata {
    fn from(m: &SyncMetadata) -> Self {
        Self {
            model: m.model.clone(),
            last_sync: m.last_sync,
            record_count: m.record_count,
            oldest_create_date: m.oldest_create_date.clone(),
            oldest_id: m.oldest_id,
            newest_create_date: m.newest_create_date.clone(),
            newest_id: m.newest_id,
        }
    }
}

impl From<StoredMetadata> for SyncMetadata {
    fn from(s: StoredMetadata) -> Self {
        SyncMetadata {
            model: s.model,
            last_sync: s.last_sync,
            record_count: s.record_count,
            oldest_create_date: s.oldest_create_date,
            oldest_id: s.oldest_id,
            newest_create_date: s.newest_create_date,
            newest_id: s.newest_id,
        }
    }
}

/// One JSON file per model under a state directory.
pub struct SyncStore {
    dir: PathBuf,
}

impl SyncStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, model: &str) -> PathBuf {
        self.dir.join(format!("{}.json", model.replace('.', "_")))
    }

    /// Loads `model`'s metadata, or a fresh zero-value if none was ever saved.
    pub async fn load(&self, model: &str) -> Result<SyncMetadata, SyncStoreError> {
        let path = self.path_for(model);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let stored: StoredMetadata = serde_json::from_str(&contents)?;
                Ok(stored.into())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncMetadata::new(model)),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes `metadata` to a sibling temp file, then renames it over the
    /// real path, so readers never observe a partially-written file.
    pub async fn save(&self, metadata: &SyncMetadata) -> Result<(), SyncStoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&metadata.model);
        let tmp_path = self.tmp_path_for(&path);

        let body = serde_json::to_vec_pretty(&StoredMetadata::from(metadata))?;
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    fn tmp_path_for(&self, path: &Path) -> PathBuf {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("metadata");
        self.dir.join(format!(".{file_name}.tmp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn load_of_a_never_synced_model_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStore::new(dir.path());
        let metadata = store.load("crm.lead").await.unwrap();
        assert_eq!(metadata.record_count, 0);
        assert_eq!(metadata.last_sync, chrono::DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStore::new(dir.path());
        let mut metadata = SyncMetadata::new("crm.lead");
        metadata.last_sync = Utc::now();
        metadata.record_count = 42;

        store.save(&metadata).await.unwrap();
        let loaded = store.load("crm.lead").await.unwrap();
        assert_eq!(loaded.record_count, 42);
        assert_eq!(loaded.last_sync, metadata.last_sync);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStore::new(dir.path());
        store.save(&SyncMetadata::new("res.partner")).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["res_partner.json"]);
    }
}
