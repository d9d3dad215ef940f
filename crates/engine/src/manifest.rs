//! Normalization manifest storage.
//!
//! The store is the only state several workers mutate concurrently, so
//! every implementation serializes access internally. The file-backed
//! store rewrites the whole document through a temporary file and a
//! rename, so a crash never leaves a half-written manifest behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clipstitch_common::StitchResult;
use clipstitch_model::{ManifestDocument, ManifestKey, ManifestRecord};
use tokio::sync::Mutex;

/// File name of the manifest inside the bumper cache directory.
pub const MANIFEST_FILE: &str = "_manifest.json";

/// Durable map from source (plus fingerprint) to normalization record.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Record for `key`, only if it was stored with the same fingerprint.
    async fn get(&self, key: &ManifestKey) -> StitchResult<Option<ManifestRecord>>;

    /// Store `record` for `key`, replacing any record for the same source.
    async fn put(&self, key: &ManifestKey, record: ManifestRecord) -> StitchResult<()>;

    /// Number of stored records.
    async fn len(&self) -> usize;
}

pub type SharedManifest = Arc<dyn ManifestStore>;

/// Manifest persisted as JSON.
#[derive(Debug)]
pub struct JsonManifestStore {
    path: PathBuf,
    doc: Mutex<ManifestDocument>,
}

impl JsonManifestStore {
    /// Open the manifest at `path`. A missing file starts empty; an
    /// unreadable one is discarded with a warning, since every entry can
    /// be recomputed.
    pub async fn open(path: impl Into<PathBuf>) -> StitchResult<Self> {
        let path = path.into();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<ManifestDocument>(&content) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt manifest");
                    ManifestDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ManifestDocument::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), entries = doc.entries.len(), "Manifest loaded");
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Open `<dir>/_manifest.json`.
    pub async fn open_in(dir: &Path) -> StitchResult<Self> {
        Self::open(dir.join(MANIFEST_FILE)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, doc: &ManifestDocument) -> StitchResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ManifestStore for JsonManifestStore {
    async fn get(&self, key: &ManifestKey) -> StitchResult<Option<ManifestRecord>> {
        let doc = self.doc.lock().await;
        Ok(doc
            .entries
            .get(&key.entry_name())
            .filter(|r| r.fingerprint == key.fingerprint)
            .cloned())
    }

    async fn put(&self, key: &ManifestKey, record: ManifestRecord) -> StitchResult<()> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        next.version = next.version.max(1);
        next.entries.insert(key.entry_name(), record);
        // Readers only see the record once it is on disk.
        self.persist(&next).await?;
        *doc = next;
        Ok(())
    }

    async fn len(&self) -> usize {
        self.doc.lock().await.entries.len()
    }
}

/// In-memory manifest, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    entries: Mutex<BTreeMap<String, ManifestRecord>>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    async fn get(&self, key: &ManifestKey) -> StitchResult<Option<ManifestRecord>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(&key.entry_name())
            .filter(|r| r.fingerprint == key.fingerprint)
            .cloned())
    }

    async fn put(&self, key: &ManifestKey, record: ManifestRecord) -> StitchResult<()> {
        self.entries.lock().await.insert(key.entry_name(), record);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clipstitch_model::Fingerprint;

    fn record(fp: Fingerprint) -> ManifestRecord {
        ManifestRecord {
            fingerprint: fp,
            canonical_path: PathBuf::from("/cache/_trans/static.mp4"),
            audio_synthesized: true,
            loudness_applied: false,
            profile_id: "p".into(),
            duration_secs: Some(1.0),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_json_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let fp = Fingerprint {
            size: 3,
            mtime_ns: 9,
        };
        let key = ManifestKey::new("/t/static.mp4", fp);

        let store = JsonManifestStore::open_in(dir.path()).await.unwrap();
        store.put(&key, record(fp)).await.unwrap();
        assert!(!dir.path().join("_manifest.json.tmp").exists());

        let reopened = JsonManifestStore::open_in(dir.path()).await.unwrap();
        let hit = reopened.get(&key).await.unwrap().unwrap();
        assert!(hit.audio_synthesized);
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_misses() {
        let store = MemoryManifestStore::new();
        let fp = Fingerprint {
            size: 3,
            mtime_ns: 9,
        };
        store
            .put(&ManifestKey::new("/t/a.mp4", fp), record(fp))
            .await
            .unwrap();
        let changed = ManifestKey::new("/t/a.mp4", Fingerprint { mtime_ns: 10, ..fp });
        assert!(store.get(&changed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_stale_entry() {
        let store = MemoryManifestStore::new();
        let old = Fingerprint {
            size: 1,
            mtime_ns: 1,
        };
        let new = Fingerprint {
            size: 2,
            mtime_ns: 2,
        };
        store
            .put(&ManifestKey::new("/t/a.mp4", old), record(old))
            .await
            .unwrap();
        store
            .put(&ManifestKey::new("/t/a.mp4", new), record(new))
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonManifestStore::open_in(dir.path()).await.unwrap();
        // A directory where the manifest file should be makes the rename fail.
        std::fs::create_dir(store.path()).unwrap();

        let fp = Fingerprint {
            size: 3,
            mtime_ns: 9,
        };
        let key = ManifestKey::new("/t/static.mp4", fp);
        assert!(store.put(&key, record(fp)).await.is_err());
        assert!(store.get(&key).await.unwrap().is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_corrupt_manifest_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "{ not json").unwrap();
        let store = JsonManifestStore::open_in(dir.path()).await.unwrap();
        assert_eq!(store.len().await, 0);
    }
}
