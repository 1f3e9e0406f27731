// ── De-integration record stores ──
//
// Records must outlive the process so reintegration works after a crash.
// `FileRecordStore` keeps one JSON document per record; writes go to a
// temp file that is renamed over the target.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::DeintegrationRecord;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace by `record.id`.
    async fn save(&self, record: &DeintegrationRecord) -> Result<(), CoreError>;

    async fn load(&self, id: Uuid) -> Result<Option<DeintegrationRecord>, CoreError>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<DeintegrationRecord>, CoreError>;
}

fn storage(context: &str, err: impl std::fmt::Display) -> CoreError {
    CoreError::Storage {
        message: format!("{context}: {err}"),
    }
}

fn sort_by_start(records: &mut [DeintegrationRecord]) {
    records.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
}

// ── Memory ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<Uuid, DeintegrationRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(&self, record: &DeintegrationRecord) -> Result<(), CoreError> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<DeintegrationRecord>, CoreError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn list(&self) -> Result<Vec<DeintegrationRecord>, CoreError> {
        let mut records: Vec<DeintegrationRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        sort_by_start(&mut records);
        Ok(records)
    }
}

// ── File ─────────────────────────────────────────────────────────────

/// `<dir>/<record-id>.json`, one file per record.
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage(&format!("create {}", dir.display()), e))?;
        debug!(dir = %dir.display(), "record store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn save(&self, record: &DeintegrationRecord) -> Result<(), CoreError> {
        let target = self.path_for(record.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", record.id));
        let body = serde_json::to_vec_pretty(record).map_err(|e| storage("serialize record", e))?;

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| storage(&format!("write {}", tmp.display()), e))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| storage(&format!("rename to {}", target.display()), e))?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<DeintegrationRecord>, CoreError> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| storage(&format!("parse {}", path.display()), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage(&format!("read {}", path.display()), e)),
        }
    }

    /// Unreadable files are skipped with a warning.
    async fn list(&self) -> Result<Vec<DeintegrationRecord>, CoreError> {
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| storage(&format!("list {}", self.dir.display()), e))?;

        let mut records = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| storage(&format!("list {}", self.dir.display()), e))?
        {
            let path = item.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !item.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            let parsed = tokio::fs::read(&path)
                .await
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<DeintegrationRecord>(&bytes).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }
        sort_by_start(&mut records);
        Ok(records)
    }
}
