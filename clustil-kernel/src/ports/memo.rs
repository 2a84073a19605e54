/**
 * MEMO STORES - AnnotationStore implementations
 *
 * FileAnnotationStore keeps every record in memory and rewrites the whole
 * JSON file after each mutation; a missing file bootstraps an empty store.
 *
 * FILE FORMAT:
 * ```json
 * [
 *   {"node_id": "node-01", "gpu_id": "gpu-1-0", "text": "fine-tuning, ping eg.yun",
 *    "editor": "eg.yun", "timestamp": "2026-10-17T09:00:00Z"}
 * ]
 * ```
 */

use super::{AnnotationRecord, AnnotationStore, StoreError};
use clustil_protocol::DeviceKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct MemoryAnnotationStore {
    records: HashMap<DeviceKey, AnnotationRecord>,
}

impl MemoryAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnnotationStore for MemoryAnnotationStore {
    fn get(&self, key: &DeviceKey) -> Option<AnnotationRecord> {
        self.records.get(key).cloned()
    }

    fn set(&mut self, key: DeviceKey, text: &str, editor: Option<&str>) -> Result<(), StoreError> {
        self.records.insert(key, AnnotationRecord::new(text, editor));
        Ok(())
    }

    fn delete(&mut self, key: &DeviceKey) -> Result<bool, StoreError> {
        Ok(self.records.remove(key).is_some())
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

/// On-disk row; flat so the file stays readable by hand.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMemo {
    node_id: String,
    gpu_id: String,
    #[serde(flatten)]
    record: AnnotationRecord,
}

pub struct FileAnnotationStore {
    storage_path: PathBuf,
    cache: MemoryAnnotationStore,
}

impl FileAnnotationStore {
    pub fn open<P: Into<PathBuf>>(storage_path: P) -> Result<Self, StoreError> {
        let mut store = Self {
            storage_path: storage_path.into(),
            cache: MemoryAnnotationStore::new(),
        };
        store.load_from_disk()?;
        info!(
            "memo store initialized at {:?} ({} records)",
            store.storage_path,
            store.cache.len()
        );
        Ok(store)
    }

    fn load_from_disk(&mut self) -> Result<(), StoreError> {
        if !self.storage_path.exists() {
            fs::write(&self.storage_path, "[]")?;
            return Ok(());
        }
        let content = fs::read_to_string(&self.storage_path)?;
        let rows: Vec<StoredMemo> = if content.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&content)?
        };
        self.cache.records = rows
            .into_iter()
            .map(|row| (DeviceKey::new(row.node_id, row.gpu_id), row.record))
            .collect();
        Ok(())
    }

    fn save_to_disk(&self) -> Result<(), StoreError> {
        let mut rows: Vec<StoredMemo> = self
            .cache
            .records
            .iter()
            .map(|(key, record)| StoredMemo {
                node_id: key.node_id.clone(),
                gpu_id: key.device_id.clone(),
                record: record.clone(),
            })
            .collect();
        rows.sort_by(|a, b| (&a.node_id, &a.gpu_id).cmp(&(&b.node_id, &b.gpu_id)));
        let json = serde_json::to_string_pretty(&rows)?;
        fs::write(&self.storage_path, json)?;
        Ok(())
    }

    /// Puts back the cache entry a failed write replaced.
    fn restore(&mut self, key: DeviceKey, previous: Option<AnnotationRecord>) {
        warn!("memo file not written, rolling back {key}");
        match previous {
            Some(record) => self.cache.records.insert(key, record),
            None => self.cache.records.remove(&key),
        };
    }
}

impl AnnotationStore for FileAnnotationStore {
    fn get(&self, key: &DeviceKey) -> Option<AnnotationRecord> {
        self.cache.get(key)
    }

    fn set(&mut self, key: DeviceKey, text: &str, editor: Option<&str>) -> Result<(), StoreError> {
        let previous = self.cache.records.insert(key.clone(), AnnotationRecord::new(text, editor));
        if let Err(e) = self.save_to_disk() {
            self.restore(key, previous);
            return Err(e);
        }
        debug!("memo written for {key}");
        Ok(())
    }

    fn delete(&mut self, key: &DeviceKey) -> Result<bool, StoreError> {
        let Some(previous) = self.cache.records.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.save_to_disk() {
            self.restore(key.clone(), Some(previous));
            return Err(e);
        }
        debug!("memo deleted for {key}");
        Ok(true)
    }

    fn len(&self) -> usize {
        self.cache.len()
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}
