use super::{CallRecord, CallRecordStore, CallRecordUpdate};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{info, warn};

/// Stores one JSON document per call under `root`.
///
/// Writes go through a single lock so that racing merges for the same call
/// never lose fields.
pub struct LocalCallRecordStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalCallRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            std::fs::create_dir_all(&root)
                .map_err(|e| anyhow!("{}: {}", e, root.to_string_lossy()))?;
            info!("LocalCallRecordStore created directory: {}", root.display());
        }
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, call_id: &str) -> Result<PathBuf> {
        let valid = !call_id.is_empty()
            && call_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(anyhow!("invalid call id: {:?}", call_id));
        }
        Ok(self.root.join(format!("{}.json", call_id)))
    }

    async fn read(path: &Path) -> Result<Option<CallRecord>> {
        match fs::read(path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(path: &Path, record: &CallRecord) -> Result<()> {
        let content = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&content).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl CallRecordStore for LocalCallRecordStore {
    async fn create(&self, record: CallRecord) -> Result<()> {
        let path = self.record_path(&record.call_id)?;
        let _guard = self.write_lock.lock().await;
        let merged = match Self::read(&path).await? {
            Some(mut existing) => {
                existing.merge_created(record);
                existing
            }
            None => record,
        };
        Self::write(&path, &merged).await
    }

    async fn update(&self, call_id: &str, update: CallRecordUpdate) -> Result<CallRecord> {
        let path = self.record_path(call_id)?;
        let _guard = self.write_lock.lock().await;
        let mut record = Self::read(&path)
            .await?
            .unwrap_or_else(|| CallRecord::new(call_id, "", ""));
        record.apply(update);
        Self::write(&path, &record).await?;
        Ok(record)
    }

    async fn get(&self, call_id: &str) -> Result<Option<CallRecord>> {
        let path = self.record_path(call_id)?;
        Self::read(&path).await
    }

    async fn all(&self) -> Result<Vec<CallRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("skipping unreadable call record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}
