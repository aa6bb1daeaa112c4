use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Slot;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {id}")]
    NotFound { id: String },

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to encode composite image: {0}")]
    ImageEncode(#[from] image::ImageError),
}

/// A review record as the record-storage collaborator hands it over: source
/// images per slot, the opaque previously-stored annotation payload, and the
/// workflow status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub images: BTreeMap<Slot, String>,
    #[serde(default)]
    pub annotation_data: Option<Value>,
    #[serde(default)]
    pub annotated_image_url: Option<String>,
    pub status: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields a successful save writes back to the record.
#[derive(Clone, Debug)]
pub struct RecordUpdate {
    /// The full annotation document, JSON-serialized to a string as the
    /// hosted backend stored it.
    pub annotation_data: String,
    pub annotated_image_url: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

pub trait RecordStore: Send + Sync {
    fn load(&self, id: &str) -> Result<Record, StoreError>;
    fn update(&self, id: &str, update: RecordUpdate) -> Result<(), StoreError>;
}

pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `path` and returns a stable public reference.
    fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, StoreError>;
    fn public_url(&self, path: &str) -> String;
}

/// Storage path convention for uploaded composites.
pub fn annotated_blob_path(record_id: &str, slot: Slot, timestamp_ms: i64) -> String {
    format!("annotated/{record_id}/{slot}-{timestamp_ms}.png")
}

// ── Filesystem backends ─────────────────────────────────────────────────────

/// Record store over a local data directory: one JSON file per record under
/// `<root>/records/`.
pub struct FsRecordStore {
    records_dir: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: &Path) -> Self {
        Self {
            records_dir: root.join("records"),
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.records_dir.join(format!("{id}.json"))
    }

    /// Seeds a record file; used by setup tooling and tests.
    pub fn create(&self, record: &Record) -> Result<(), StoreError> {
        fs::create_dir_all(&self.records_dir)?;
        let text = serde_json::to_string_pretty(record)?;
        fs::write(self.record_path(&record.id), text)?;
        Ok(())
    }
}

impl RecordStore for FsRecordStore {
    fn load(&self, id: &str) -> Result<Record, StoreError> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn update(&self, id: &str, update: RecordUpdate) -> Result<(), StoreError> {
        let mut record = self.load(id)?;
        record.annotation_data = Some(Value::String(update.annotation_data));
        record.annotated_image_url = Some(update.annotated_image_url);
        record.status = update.status;
        record.updated_at = Some(update.updated_at);
        let text = serde_json::to_string_pretty(&record)?;
        fs::write(self.record_path(id), text)?;
        Ok(())
    }
}

/// Blob store over a local data directory, standing in for the hosted
/// object storage. References are `file://` URLs.
pub struct FsBlobStore {
    blobs_dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: &Path) -> Self {
        Self {
            blobs_dir: root.join("blobs"),
        }
    }
}

impl BlobStore for FsBlobStore {
    fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let target = self.blobs_dir.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;
        tracing::debug!(path, size = bytes.len(), "uploaded blob");
        Ok(self.public_url(path))
    }

    fn public_url(&self, path: &str) -> String {
        format!("file://{}", self.blobs_dir.join(path).display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(id: &str) -> Record {
        let mut images = BTreeMap::new();
        images.insert(Slot::Upper, "upper.png".to_string());
        Record {
            id: id.to_string(),
            images,
            annotation_data: None,
            annotated_image_url: None,
            status: "pending".to_string(),
            updated_at: None,
        }
    }

    #[test]
    fn record_round_trips_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        store.create(&sample_record("rec-1")).unwrap();

        let loaded = store.load("rec-1").unwrap();
        assert_eq!(loaded.status, "pending");
        assert_eq!(loaded.images[&Slot::Upper], "upper.png");
    }

    #[test]
    fn missing_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        assert!(matches!(
            store.load("nope"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn update_patches_annotation_fields_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        store.create(&sample_record("rec-2")).unwrap();

        store
            .update(
                "rec-2",
                RecordUpdate {
                    annotation_data: "{\"annotations\":{}}".to_string(),
                    annotated_image_url: "file:///out.png".to_string(),
                    status: "annotated".to_string(),
                    updated_at: Utc::now(),
                },
            )
            .unwrap();

        let loaded = store.load("rec-2").unwrap();
        assert_eq!(loaded.status, "annotated");
        assert_eq!(loaded.annotated_image_url.as_deref(), Some("file:///out.png"));
        assert!(loaded.annotation_data.is_some());
        assert_eq!(loaded.images[&Slot::Upper], "upper.png", "images untouched");
    }

    #[test]
    fn blob_upload_writes_bytes_and_returns_its_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let path = annotated_blob_path("rec-3", Slot::Front, 1_700_000_000_000);
        assert_eq!(path, "annotated/rec-3/front-1700000000000.png");

        let url = store.upload(&path, b"png-bytes").unwrap();
        assert_eq!(url, store.public_url(&path));
        assert!(url.starts_with("file://"));

        let on_disk = dir.path().join("blobs").join(&path);
        assert_eq!(fs::read(on_disk).unwrap(), b"png-bytes");
    }
}
