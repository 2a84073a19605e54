/**
 * ANNOTATION PORT - Persistence of device memos
 *
 * ROLE:
 * Stores the free-text notes operators attach to devices, keyed by
 * (node id, device id). Snapshots are regenerated from scratch on every
 * tick, so the kernel re-attaches these records each time it samples.
 *
 * OPERATIONS:
 * - get / set / delete per device key
 * - write = set, or delete when the text is blank
 *
 * IMPLEMENTATIONS (memo.rs):
 * - MemoryAnnotationStore : volatile, lost on restart
 * - FileAnnotationStore   : JSON file rewritten after each mutation
 */

pub mod memo;

use clustil_protocol::{is_blank, DeviceKey, Editor};
use serde::{Deserialize, Serialize};
use std::path::Path;
use time::OffsetDateTime;

pub use memo::{FileAnnotationStore, MemoryAnnotationStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One stored memo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub text: String,
    pub editor: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl AnnotationRecord {
    pub fn new(text: &str, editor: Option<&str>) -> Self {
        Self {
            text: text.to_string(),
            editor: editor.map(str::to_string),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Editor as exposed on the wire; only present when a name was given.
    pub fn wire_editor(&self) -> Option<Editor> {
        self.editor.as_ref().map(|name| Editor {
            name: name.clone(),
            timestamp: self.timestamp,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Set,
    Deleted,
}

pub trait AnnotationStore: Send {
    fn get(&self, key: &DeviceKey) -> Option<AnnotationRecord>;

    /// Stores `text` as-is. Use `write` for the blank-means-delete rule.
    fn set(&mut self, key: DeviceKey, text: &str, editor: Option<&str>) -> Result<(), StoreError>;

    /// Returns whether a record existed. Deleting an absent record is fine.
    fn delete(&mut self, key: &DeviceKey) -> Result<bool, StoreError>;

    fn len(&self) -> usize;

    /// Short name for health reporting.
    fn kind(&self) -> &'static str;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&mut self, key: DeviceKey, text: &str, editor: Option<&str>) -> Result<WriteKind, StoreError> {
        if is_blank(text) {
            self.delete(&key)?;
            Ok(WriteKind::Deleted)
        } else {
            self.set(key, text, editor)?;
            Ok(WriteKind::Set)
        }
    }
}

/// Picks the file-backed store when a path is configured.
pub fn create_annotation_store(path: Option<&Path>) -> Result<Box<dyn AnnotationStore>, StoreError> {
    match path {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            Ok(Box::new(FileAnnotationStore::open(path)?))
        }
        None => Ok(Box::new(MemoryAnnotationStore::new())),
    }
}
